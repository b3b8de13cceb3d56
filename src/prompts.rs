//! Task prompts for VLM-based field extraction.
//!
//! Every prompt sent to the model is built here so the numeric-fidelity and
//! field-identity rules can be inspected by tests without a live model.
//!
//! The rules in [`FIDELITY_RULES`] are appended to every prompt, including a
//! caller-supplied override: the pipeline parses the raw response as JSON and
//! echoes numbers unchanged, so the model has to get sign, blanks and number
//! types right on its own.

/// Rules shared by every extraction prompt.
pub const FIDELITY_RULES: &str = r#"RULES:
- Be very careful with negative numbers. A value is negative ONLY if an explicit "-" minus sign is printed in the source.
- Numbers shown in parentheses, such as (1,234), are NOT negative. Report (1,234) as 1234.
- Do not respond with null for empty fields. Respond with an empty string "".
- Every field you can see must appear as a key in your output, with its value or "". Do not skip fields that have no value.
- The fields are very close to each other. Do not confuse which value belongs to which field; never move a value to a neighbouring field.
- Parse all numbers as JSON numbers, not as strings. Do not include thousands separators or currency symbols in numbers.
- Return only plain, raw JSON (a single object or array). No ``` fences, no commentary, no surrounding characters: your answer is fed to a JSON parser as-is."#;

/// Full-field extraction from one tax document page (the "input" extractor).
pub const FULL_FIELD_PROMPT: &str = r#"Extract all fields in this page from a tax document as properly formatted JSON.
Do not extract names, addresses, SSNs or other PII, but extract all other information: financial numbers, text fields, checkboxes and everything else.
If a field is empty you must still extract it and return an empty string as its value. If there is a field, return it with either its value or an empty string.
If the page is a cover page or carries no information, return an empty JSON object ({}).
Please do not try to over-optimise."#;

/// Fixed-schema federal/state tax-summary extraction (the "output" extractor).
pub const TAX_SUMMARY_PROMPT: &str = r#"Extract the following details from the image and return them as JSON:

Federal Tax Information:
- Adjusted gross income amount
- Itemized deductions amount
- Taxable income amount
- Tax liability amount
- Amount due
- Federal tax bracket percentage
- Required quarterly Federal estimated payment amounts for all quarters
- Federal tax rate percentage

State Tax Information:
- State adjusted gross income amount
- State taxable income amount
- State tax liability amount
- State tax due / refund amount
- State tax rate bracket percentage
- Whether state estimated payments are required
- Average tax rate percentage

Combined Federal & State Information:
- Total projected net tax due amount"#;

/// Preamble for spreadsheet units; the serialised table follows it.
pub const TABULAR_PREAMBLE: &str = r#"Analyze this spreadsheet data and extract all relevant financial/tax information as key-value pairs in JSON format.
Identify any numerical values, percentages and dates, and categorize them appropriately:"#;

/// Prompt for one page image: the task (or override) followed by the rules.
pub fn page_prompt(task_prompt: &str) -> String {
    format!("{}\n\n{}", task_prompt.trim_end(), FIDELITY_RULES)
}

/// Prompt for one spreadsheet: preamble, table text, then the rules.
pub fn tabular_prompt(table_text: &str) -> String {
    format!(
        "{}\n\n{}\n\n{}",
        TABULAR_PREAMBLE,
        table_text.trim_end(),
        FIDELITY_RULES
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_has_rules(prompt: &str) {
        assert!(prompt.contains("explicit \"-\" minus sign"));
        assert!(prompt.contains("(1,234) as 1234"));
        assert!(prompt.contains("empty string"));
        assert!(prompt.contains("Every field you can see"));
        assert!(prompt.contains("close to each other"));
        assert!(prompt.contains("JSON numbers"));
        assert!(prompt.contains("No ``` fences"));
    }

    #[test]
    fn page_prompts_carry_fidelity_rules() {
        assert_has_rules(&page_prompt(FULL_FIELD_PROMPT));
        assert_has_rules(&page_prompt(TAX_SUMMARY_PROMPT));
        assert_has_rules(&page_prompt("custom instructions"));
    }

    #[test]
    fn tabular_prompt_embeds_table_before_rules() {
        let p = tabular_prompt("| a |\n| 1 |\n");
        assert_has_rules(&p);
        let table_at = p.find("| a |").unwrap();
        let rules_at = p.find("RULES:").unwrap();
        assert!(table_at < rules_at);
        assert!(p.starts_with(TABULAR_PREAMBLE));
    }

    #[test]
    fn summary_prompt_lists_fixed_schema() {
        assert!(TAX_SUMMARY_PROMPT.contains("Adjusted gross income"));
        assert!(TAX_SUMMARY_PROMPT.contains("Total projected net tax due"));
    }
}
