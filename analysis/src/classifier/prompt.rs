use crate::error::ClassificationError;
use model::{PullRequestRecord, WorkType};
use serde::Deserialize;
use serde_json::json;

const MISSING_BODY: &str = "No description";

/// 估算 prompt 的 token 数, 用于限流预算
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> u64;
}

/// Roughly one token per four bytes of text, rounded up.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteEstimate;

impl TokenCounter for ByteEstimate {
    fn count(&self, text: &str) -> u64 {
        (text.len() as u64).div_ceil(4)
    }
}

fn category_list(allowed: &[WorkType]) -> String {
    allowed
        .iter()
        .map(WorkType::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn system_prompt(allowed: &[WorkType]) -> String {
    format!(
        r#"You are a Staff Software Engineer at one of the top tech companies.
You will analyze a pull request and classify it into one of these categories:
{categories}.
You will be provided with input as:
{{
    "pr_number": <number>,
    "title": <text>,
    "body": <text>,
    "labels": [<list of strings>]
}}
Do your best to understand and infer a category other than "other". When you are not sure, output "other".
Output a string containing the following information: "pr_number,category"
- pr_number is the same as the input pr_number
- category is your assignment category to the PR and must be one of the categories in the list"#,
        categories = category_list(allowed)
    )
}

pub fn batch_system_prompt(allowed: &[WorkType]) -> String {
    format!(
        r#"You are a Staff Software Engineer at one of the top tech companies.
You will analyze a pull request and classify it into one of these categories:
{categories}.
You will be provided with input as:
{{
    "pr_number": <number>,
    "title": <text>,
    "body": <text>,
    "labels": [<list of strings>]
}}
Do your best to understand and infer a category other than "other". When you are not sure, output the category "other".
Respond with exactly one json object: {{"pr_number":<number>,"pr_type":<text>}}
- pr_number is the same as the input pr_number
- pr_type is your assignment category to the PR and must be one of the categories in the list"#,
        categories = category_list(allowed)
    )
}

fn pr_payload(pr: &PullRequestRecord) -> serde_json::Value {
    json!({
        "pr_number": pr.number,
        "title": pr.title,
        "body": pr.body.as_deref().filter(|b| !b.trim().is_empty()).unwrap_or(MISSING_BODY),
        "labels": pr.labels,
    })
}

pub fn user_prompt(pr: &PullRequestRecord, allowed: &[WorkType]) -> String {
    format!(
        "Analyze this pull request and classify it into one of these categories: {}.\n{:#}",
        category_list(allowed),
        pr_payload(pr)
    )
}

/// The user message of a batch task carries only the PR payload.
pub fn batch_user_prompt(pr: &PullRequestRecord) -> String {
    pr_payload(pr).to_string()
}

fn parse_category(
    number: i64,
    category: &str,
    allowed: &[WorkType],
) -> Result<WorkType, ClassificationError> {
    let unknown = || ClassificationError::UnknownCategory {
        number,
        category: category.to_owned(),
    };
    let work_type: WorkType = category.parse().map_err(|_| unknown())?;
    if !allowed.is_empty() && !allowed.contains(&work_type) {
        return Err(unknown());
    }
    Ok(work_type)
}

/// Parses the strict `number,category` answer of a single-item request.
pub fn parse_single_response(
    content: &str,
    expected_number: i64,
    allowed: &[WorkType],
) -> Result<WorkType, ClassificationError> {
    let parse_error = || ClassificationError::Parse {
        number: expected_number,
        content: content.to_owned(),
    };
    let parts: Vec<&str> = content.trim().split(',').map(str::trim).collect();
    let [number, category] = parts.as_slice() else {
        return Err(parse_error());
    };
    let got: i64 = number.trim_start_matches('#').parse().map_err(|_| parse_error())?;
    if got != expected_number {
        return Err(ClassificationError::NumberMismatch {
            expected: expected_number,
            got,
        });
    }
    parse_category(expected_number, category, allowed)
}

#[derive(Debug, Deserialize)]
struct BatchAnswer {
    pr_number: serde_json::Value,
    pr_type: String,
}

/// Parses the json object a batch task answered with.
pub fn parse_batch_answer(
    content: &str,
    expected_number: i64,
    allowed: &[WorkType],
) -> Result<WorkType, ClassificationError> {
    let parse_error = || ClassificationError::Parse {
        number: expected_number,
        content: content.to_owned(),
    };
    let answer: BatchAnswer = serde_json::from_str(content.trim()).map_err(|_| parse_error())?;
    // some models quote the number
    let got = match &answer.pr_number {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(parse_error)?;
    if got != expected_number {
        return Err(ClassificationError::NumberMismatch {
            expected: expected_number,
            got,
        });
    }
    parse_category(expected_number, &answer.pr_type, allowed)
}
