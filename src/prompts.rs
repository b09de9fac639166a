//! Prompt templates for table classification and markup synthesis.
//!
//! Templates use `{name}` placeholders filled by literal substitution
//! ([`fill_template`]); all other braces, such as the JSON example in the
//! classification prompt, are copied through untouched.
//!
//! Callers can override either template via
//! [`crate::config::PipelineConfig::classification_prompt`] and
//! [`crate::config::PipelineConfig::markup_prompt`]; the constants here are
//! used only when no override is provided.

/// Placeholder for the page's extracted text in the classification template.
pub const TABLE_DETECTION_PLACEHOLDER: &str = "{pdf_page_text}";

/// Placeholder for the raster image reference in the markup template.
pub const IMAGE_REFERENCE_PLACEHOLDER: &str = "{image_reference}";

/// Placeholder for the OCR text in the markup template.
pub const OCR_TEXT_PLACEHOLDER: &str = "{ocr_page_text}";

/// Placeholders a markup template must contain.
pub const MARKUP_PLACEHOLDERS: [&str; 2] = [IMAGE_REFERENCE_PLACEHOLDER, OCR_TEXT_PLACEHOLDER];

/// Default classification prompt.
pub const DEFAULT_TABLE_DETECTION_PROMPT: &str = r#"### TASK ###
You are a document layout analysis system. The text below was extracted by OCR from a single PDF page. Decide whether the page contains a table, meaning data laid out in distinct rows and columns.

Look for repeated column alignment, header rows, cells separated by whitespace or rules, and values that line up across several lines.

### PAGE TEXT ###
{pdf_page_text}

### RESPONSE FORMAT ###
Reply with a JSON object and nothing else:
{
  "tableDetected": true | false,
  "confidenceScore": number between 0.0 and 1.0
}
Base the confidence score on how clear and regular the row and column structure is."#;

/// Default markup prompt.
pub const DEFAULT_MARKUP_PROMPT: &str = r#"You reproduce printed document pages as a single self-contained HTML file.

### INPUT ###
- The page image: {image_reference}
- OCR text from the same page, to help with spelling: {ocr_page_text}

### RULES ###
1. Output one complete HTML5 document. Put every style in a single <style> element inside <head>. No JavaScript, no external fonts, stylesheets or images.
2. Reproduce all visible content from {image_reference} in reading order. Use the OCR text as a guide for wording, but follow the image for structure.
3. Typography: use "Arial", "Helvetica", sans-serif. Match relative font sizes, weights, alignment and the heading hierarchy.
4. Layout: size the body for an A4 portrait page with roughly 15 mm margins. Use flexbox or grid to keep blocks in their visual position.
5. Tables: every table uses <table>, <thead>, <tbody>, <tr>, <th> and <td>, with border-collapse: collapse and a visible 1px border on every cell. Use colspan and rowspan where cells span. A bordered box whose bullet points are arranged in visual columns is a table too: put each item in its own cell.
6. Colours: approximate background, text and border colours with hex values.

Output only the HTML document, with no explanation before or after it."#;

/// Fill `{name}` placeholders in `template` in a single left-to-right pass.
///
/// Substituted values are never re-scanned, so page text that happens to
/// contain `{ocr_page_text}` is inserted verbatim. Every key must occur in
/// the template at least once.
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> Result<String, String> {
    for (key, _) in values {
        if !template.contains(key) {
            return Err(format!("template is missing placeholder {key}"));
        }
    }

    let mut out = String::with_capacity(template.len() + values.iter().map(|(_, v)| v.len()).sum::<usize>());
    let mut rest = template;
    loop {
        let next = values
            .iter()
            .filter_map(|(k, v)| rest.find(k).map(|pos| (pos, *k, *v)))
            .min_by_key(|(pos, _, _)| *pos);
        match next {
            Some((pos, key, value)) => {
                out.push_str(&rest[..pos]);
                out.push_str(value);
                rest = &rest[pos + key.len()..];
            }
            None => {
                out.push_str(rest);
                break;
            }
        }
    }
    Ok(out)
}

/// Render the classification prompt for one page.
pub fn classification_prompt(template: &str, page_text: &str) -> Result<String, String> {
    fill_template(template, &[(TABLE_DETECTION_PLACEHOLDER, page_text)])
}

/// Render the markup prompt for one page. `image_name` is the raster file
/// name, e.g. `page_3.png`.
pub fn markup_prompt(template: &str, image_name: &str, ocr_text: &str) -> Result<String, String> {
    let reference = format!("the provided image ({image_name})");
    fill_template(
        template,
        &[
            (IMAGE_REFERENCE_PLACEHOLDER, reference.as_str()),
            (OCR_TEXT_PLACEHOLDER, ocr_text),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_contain_their_placeholders() {
        assert!(DEFAULT_TABLE_DETECTION_PROMPT.contains(TABLE_DETECTION_PLACEHOLDER));
        for p in MARKUP_PLACEHOLDERS {
            assert!(DEFAULT_MARKUP_PROMPT.contains(p), "missing {p}");
        }
    }

    #[test]
    fn classification_keeps_json_braces() {
        let p = classification_prompt(DEFAULT_TABLE_DETECTION_PROMPT, "Name  Qty\nBolt  4").unwrap();
        assert!(p.contains("Name  Qty\nBolt  4"));
        assert!(p.contains("\"tableDetected\": true | false"));
        assert!(!p.contains(TABLE_DETECTION_PLACEHOLDER));
    }

    #[test]
    fn markup_prompt_fills_every_occurrence() {
        let p = markup_prompt(DEFAULT_MARKUP_PROMPT, "page_3.png", "Total 12").unwrap();
        assert_eq!(p.matches("the provided image (page_3.png)").count(), 2);
        assert!(p.contains("Total 12"));
        assert!(!p.contains(IMAGE_REFERENCE_PLACEHOLDER));
    }

    #[test]
    fn values_are_not_rescanned() {
        let p = fill_template(
            "A={a} B={b}",
            &[("{a}", "{b}"), ("{b}", "x")],
        )
        .unwrap();
        assert_eq!(p, "A={b} B=x");
    }

    #[test]
    fn missing_placeholder_is_an_error() {
        let err = classification_prompt("no slot", "text").unwrap_err();
        assert!(err.contains("{pdf_page_text}"), "got: {err}");
    }
}
