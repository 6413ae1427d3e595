//! Corpus matching
//!
//! Case-insensitive substring screening of document text against the
//! configured rules, laws and keywords. No tokenisation and no fuzzy
//! matching: an entry is found when its lowercase form occurs verbatim in
//! the lowercase text.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingKind {
    Rule,
    Law,
    Keyword,
}

impl std::fmt::Display for FindingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FindingKind::Rule => write!(f, "rule"),
            FindingKind::Law => write!(f, "law"),
            FindingKind::Keyword => write!(f, "keyword"),
        }
    }
}

/// A configured entry that occurs in the document text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub value: String,
}

/// The three corpora as plain ordered lists, as read at the moment of matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Corpora {
    pub rules: Vec<String>,
    pub laws: Vec<String>,
    pub keywords: Vec<String>,
}

impl Corpora {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.laws.is_empty() && self.keywords.is_empty()
    }
}

pub struct MatchEngine;

impl MatchEngine {
    /// Findings in rules → laws → keywords order, each kind in corpus order.
    /// Duplicate corpus entries yield duplicate findings.
    pub fn find(aggregate_text: &str, corpora: &Corpora) -> Vec<Finding> {
        let lowered = aggregate_text.to_lowercase();
        let haystack = lowered.as_str();

        [
            (FindingKind::Rule, &corpora.rules),
            (FindingKind::Law, &corpora.laws),
            (FindingKind::Keyword, &corpora.keywords),
        ]
        .into_iter()
        .flat_map(|(kind, entries)| {
            entries
                .iter()
                .filter(move |entry| haystack.contains(entry.to_lowercase().as_str()))
                .map(move |entry| Finding {
                    kind,
                    value: entry.clone(),
                })
        })
        .collect()
    }

    /// One line per finding, used inside assessment prompts.
    pub fn summarize(findings: &[Finding]) -> String {
        if findings.is_empty() {
            return "No configured rules, laws or keywords were found in the documents.".to_string();
        }

        findings
            .iter()
            .map(|f| format!("- {}: {}", f.kind, f.value))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
