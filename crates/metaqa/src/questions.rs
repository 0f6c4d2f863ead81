//! MetaQA question files.
//!
//! Native MetaQA lines carry the head entity inline in brackets:
//!
//! ```text
//! what movies are about [ginger rogers]\tTop Hat|Kitty Foyle|The Gay Divorcee
//! ```
//!
//! The bracketed span becomes the record's head and is replaced by the
//! placeholder token [`HEAD_PLACEHOLDER`] in the question text. Pre-split
//! files with an explicit `head\tquestion\tanswers` layout are read as-is.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::types::{MetaQaError, QaRecord};

/// Token substituted for the bracketed head entity.
pub const HEAD_PLACEHOLDER: &str = "NE";

/// Parse one non-empty question line.
pub fn parse_qa_line(line: &str) -> Result<QaRecord, String> {
    let cols: Vec<&str> = line.trim().split('\t').collect();
    let (head, question, answers) = match cols.as_slice() {
        [question, answers] => {
            let (head, question) = extract_head(question)?;
            (head, question, *answers)
        }
        [head, question, answers] => {
            (head.trim().to_string(), question.trim().to_string(), *answers)
        }
        _ => {
            return Err(format!(
                "expected 2 or 3 tab-separated columns, found {}",
                cols.len()
            ))
        }
    };
    if head.is_empty() {
        return Err("empty head entity".to_string());
    }
    let answers: Vec<String> = answers
        .split('|')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect();
    if answers.is_empty() {
        return Err("no answers".to_string());
    }
    Ok(QaRecord::new(head, question, answers))
}

/// Split `"what movies are about [ginger rogers]"` into
/// `("ginger rogers", "what movies are about NE")`.
fn extract_head(question: &str) -> Result<(String, String), String> {
    let open = question
        .find('[')
        .ok_or_else(|| "missing '[' around head entity".to_string())?;
    let close = question[open..]
        .find(']')
        .map(|i| open + i)
        .ok_or_else(|| "missing ']' around head entity".to_string())?;
    let head = question[open + 1..close].trim().to_string();
    let text = format!(
        "{}{}{}",
        &question[..open],
        HEAD_PLACEHOLDER,
        &question[close + 1..]
    );
    Ok((head, text.trim().to_string()))
}

/// Read every record of a question file.
///
/// Blank lines are skipped; any other malformed line is a hard error. With
/// `split_answers`, each multi-answer record is expanded into one record per
/// answer.
pub fn read_qa_file(path: &Path, split_answers: bool) -> Result<Vec<QaRecord>, MetaQaError> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_qa_line(&line).map_err(|reason| MetaQaError::Parse {
            path: path.to_path_buf(),
            line: lineno + 1,
            reason,
        })?;
        records.push(record);
    }
    if split_answers {
        records = split_by_answer(records);
    }
    tracing::info!(path = %path.display(), count = records.len(), "Read questions");
    Ok(records)
}

/// Expand each record into one record per gold answer.
pub fn split_by_answer(records: Vec<QaRecord>) -> Vec<QaRecord> {
    records
        .into_iter()
        .flat_map(|r| {
            let QaRecord {
                head,
                question,
                answers,
            } = r;
            answers
                .into_iter()
                .map(move |a| QaRecord::new(head.clone(), question.clone(), vec![a]))
        })
        .collect()
}
