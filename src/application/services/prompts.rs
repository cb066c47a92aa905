//! Prompt assembly for strip batches and individual crops.

use crate::application::ports::OcrPrompt;
use crate::domain::{Block, BlockType};

const STRIP_SYSTEM: &str = "You are an expert OCR system. Extract text from each block accurately. \
Blocks are stacked vertically and separated by solid black bars. \
You MUST start each block's content with a line 'BLOCK: <id>' using the ids listed below.";

const SINGLE_TEXT_SYSTEM: &str =
    "You are an expert OCR system. Extract the text from the image accurately, preserving formatting.";

const SINGLE_TABLE_SYSTEM: &str = "You are an expert OCR system. Extract the table from the image \
as clean Markdown or HTML, preserving rows, columns and headers.";

const IMAGE_SYSTEM: &str = "You are an expert document analyst. Describe the figure and extract \
every piece of text it contains. Answer as structured JSON with an 'ocr_text' field.";

/// Placeholder values substituted into image-block templates.
#[derive(Debug, Clone, Default)]
pub struct PromptVars {
    pub doc_name: String,
    pub page_index: u32,
    pub block_id: String,
    pub hint: Option<String>,
    pub pdf_text: String,
}

fn substitute(template: &str, vars: &PromptVars) -> String {
    template
        .replace("{{doc_name}}", &vars.doc_name)
        .replace("{{page_index}}", &(vars.page_index + 1).to_string())
        .replace("{{block_id}}", &vars.block_id)
        .replace("{{hint}}", vars.hint.as_deref().unwrap_or(""))
        .replace("{{pdfplumber_text}}", &vars.pdf_text)
}

/// Batch prompt for a strip: enumerate member ids top-to-bottom and demand
/// per-block `BLOCK:` markers in the response.
pub fn build_strip_prompt(block_ids: &[String]) -> OcrPrompt {
    if block_ids.len() == 1 {
        return OcrPrompt::new(
            SINGLE_TEXT_SYSTEM,
            format!(
                "Recognize the text in the image. Begin your answer with the line \
                 'BLOCK: {}' followed by the recognized content.",
                block_ids[0]
            ),
        );
    }

    let listing = block_ids
        .iter()
        .enumerate()
        .map(|(i, id)| format!("{}. {}", i + 1, id))
        .collect::<Vec<_>>()
        .join("\n");

    let user = format!(
        "The image stacks {count} blocks top to bottom, separated by black bars.\n\
         In reading order the block ids are:\n{listing}\n\n\
         Answer in this exact format, one section per block, and do not merge blocks:\n\
         BLOCK: <first id>\n<recognized content>\n\n\
         BLOCK: <second id>\n<recognized content>\n...",
        count = block_ids.len(),
        listing = listing,
    );

    OcrPrompt::new(STRIP_SYSTEM, user)
}

/// Image-block prompt from the image template with placeholder substitution.
pub fn build_image_prompt(vars: &PromptVars) -> OcrPrompt {
    let user_template = "Document: {{doc_name}}, page {{page_index}}, block {{block_id}}.\n\
         Operator hint: {{hint}}\n\
         Text extracted from the PDF text layer (may be empty or partial):\n{{pdfplumber_text}}\n\n\
         Describe what the figure shows and return JSON with fields \
         'ocr_text' (all visible text) and 'description'.";
    OcrPrompt::new(IMAGE_SYSTEM, substitute(user_template, vars))
}

/// Single-block prompt used by the verification pass, keyed on block type.
pub fn build_single_block_prompt(block: &Block, vars: &PromptVars) -> OcrPrompt {
    match block.block_type {
        BlockType::Text => OcrPrompt::new(
            SINGLE_TEXT_SYSTEM,
            format!(
                "Recognize the text of block {} on page {} of '{}'. \
                 Return only the recognized text.",
                block.id,
                block.page_index + 1,
                vars.doc_name
            ),
        ),
        BlockType::Table => OcrPrompt::new(
            SINGLE_TABLE_SYSTEM,
            format!(
                "Recognize the table of block {} on page {} of '{}'.",
                block.id,
                block.page_index + 1,
                vars.doc_name
            ),
        ),
        BlockType::Image => build_image_prompt(vars),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_prompt_enumerates_member_ids() {
        let ids = vec!["AAAA-CCCC-DDD".to_string(), "EEEE-FFFF-GGG".to_string()];
        let prompt = build_strip_prompt(&ids);
        assert!(prompt.user.contains("AAAA-CCCC-DDD"));
        assert!(prompt.user.contains("EEEE-FFFF-GGG"));
        assert!(prompt.user.contains("BLOCK:"));
    }

    #[test]
    fn image_prompt_substitutes_placeholders() {
        let vars = PromptVars {
            doc_name: "contract.pdf".to_string(),
            page_index: 2,
            block_id: "AAAA-CCCC-DDD".to_string(),
            hint: Some("company stamp".to_string()),
            pdf_text: "ACME LLC".to_string(),
        };
        let prompt = build_image_prompt(&vars);
        assert!(prompt.user.contains("contract.pdf"));
        assert!(prompt.user.contains("page 3"));
        assert!(prompt.user.contains("AAAA-CCCC-DDD"));
        assert!(prompt.user.contains("company stamp"));
        assert!(prompt.user.contains("ACME LLC"));
        assert!(!prompt.user.contains("{{"));
    }

    #[test]
    fn image_prompt_requests_json_mode() {
        let prompt = build_image_prompt(&PromptVars::default());
        assert!(prompt.wants_json());
    }
}
