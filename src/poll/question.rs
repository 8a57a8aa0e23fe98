use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use super::aggregator::ResultAggregator;
use super::room::ConnectionId;
use crate::error::{PollError, Result};

pub type QuestionId = u64;

const MIN_OPTIONS: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOption {
    pub text: String,
    /// Informational only, never enforced
    #[serde(default)]
    pub is_correct: bool,
}

impl AnswerOption {
    pub fn new(text: impl Into<String>, is_correct: bool) -> Self {
        Self {
            text: text.into(),
            is_correct,
        }
    }
}

/// A student's recorded choice. Anything that is not an integer is kept as
/// `None` so it still overwrites an earlier answer but never gets counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(default, deserialize_with = "lenient_index")]
    pub option_index: Option<i64>,
}

impl Response {
    pub fn new(option_index: Option<i64>) -> Self {
        Self { option_index }
    }

    pub fn choice(index: i64) -> Self {
        Self::new(Some(index))
    }
}

pub(crate) fn lenient_index<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let index = value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|index| index.fract() == 0.0)
            .map(|index| index as i64)
    });
    Ok(index)
}

/// Teacher-supplied question content, validated before a question opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDraft {
    pub text: String,
    pub options: Vec<AnswerOption>,
    /// Advisory countdown in seconds
    #[serde(default)]
    pub duration: u64,
}

impl QuestionDraft {
    /// Trim the prompt, drop blank options and require at least two left
    pub fn validate(self) -> Result<Self> {
        let text = self.text.trim().to_string();
        if text.is_empty() {
            return Err(PollError::InvalidQuestion("question text is empty".to_string()));
        }

        let options: Vec<AnswerOption> = self
            .options
            .into_iter()
            .filter_map(|option| {
                let trimmed = option.text.trim();
                (!trimmed.is_empty()).then(|| AnswerOption::new(trimmed, option.is_correct))
            })
            .collect();

        if options.len() < MIN_OPTIONS {
            return Err(PollError::InvalidQuestion(format!(
                "needs at least {} options, got {}",
                MIN_OPTIONS,
                options.len()
            )));
        }

        Ok(Self {
            text,
            options,
            duration: self.duration,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: QuestionId,
    pub text: String,
    pub options: Vec<AnswerOption>,
    pub duration: u64,
    /// Unix milliseconds
    pub started_at: u64,
    #[serde(skip)]
    responses: HashMap<ConnectionId, Response>,
}

impl Question {
    pub fn new(id: QuestionId, draft: QuestionDraft, started_at: u64) -> Self {
        Self {
            id,
            text: draft.text,
            options: draft.options,
            duration: draft.duration,
            started_at,
            responses: HashMap::new(),
        }
    }

    pub fn responses(&self) -> &HashMap<ConnectionId, Response> {
        &self.responses
    }

    /// Last write wins per connection
    pub fn record(&mut self, id: ConnectionId, response: Response) {
        self.responses.insert(id, response);
    }

    pub fn withdraw(&mut self, id: &ConnectionId) -> Option<Response> {
        self.responses.remove(id)
    }

    pub fn counts(&self) -> Vec<u32> {
        ResultAggregator::tally(self.options.len(), self.responses.values())
    }
}

/// A closed question together with its final counts
#[derive(Debug, Clone, Serialize)]
pub struct ArchivedQuestion {
    #[serde(flatten)]
    pub question: Question,
    pub results: Vec<u32>,
}

impl From<Question> for ArchivedQuestion {
    fn from(question: Question) -> Self {
        let results = question.counts();
        Self { question, results }
    }
}
