use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::ai::{Generable, Snapshot};

pub const HIGHLIGHTS_MIN: usize = 2;
pub const HIGHLIGHTS_MAX: usize = 4;

/// Structured digest card for a batch of articles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub summary_text: String,
    pub highlights: Vec<String>,
    pub headline: String,
    pub icon: Option<String>,
    pub call_to_action: Option<String>,
}

/// A streamed snapshot of a [`Summary`]; any subset of fields may be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PartialSummary {
    pub summary_text: Option<String>,
    pub highlights: Option<Vec<String>>,
    pub headline: Option<String>,
    pub icon: Option<String>,
    pub call_to_action: Option<String>,
}

impl Snapshot for PartialSummary {
    fn populated(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.summary_text.is_some() {
            fields.push("summaryText");
        }
        if self.highlights.is_some() {
            fields.push("highlights");
        }
        if self.headline.is_some() {
            fields.push("headline");
        }
        if self.icon.is_some() {
            fields.push("icon");
        }
        if self.call_to_action.is_some() {
            fields.push("callToAction");
        }
        fields
    }
}

impl Generable for Summary {
    type Partial = PartialSummary;

    fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "summaryText": {
                    "type": "string",
                    "description": "A concise summary of the news, suitable for quick reading."
                },
                "highlights": {
                    "type": "array",
                    "description": "Key points or highlights from the articles.",
                    "items": { "type": "string" },
                    "minItems": HIGHLIGHTS_MIN,
                    "maxItems": HIGHLIGHTS_MAX
                },
                "headline": {
                    "type": "string",
                    "description": "A short, catchy headline for the summary."
                },
                "icon": {
                    "type": "string",
                    "description": "An emoji representing the mood or topic of the news."
                },
                "callToAction": {
                    "type": "string",
                    "description": "A suggested next step for the reader, e.g. 'Read more'."
                }
            },
            "required": ["summaryText", "highlights", "headline"]
        })
    }
}
