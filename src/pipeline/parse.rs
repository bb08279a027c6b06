//! Parsing of model replies: detection JSON and Markdown briefs.
//!
//! Models wrap answers in ```` ```json ```` fences, prepend chatter, and drift
//! on label spelling ("Key Data/Evidence", "**Core argument**:"). The rules
//! here are deterministic string and regex passes, each tested on its own,
//! so the prompts can stay focused on *what* to produce.
//!
//! Every rejection is an [`InferenceError::malformed`] whose message says what
//! was wrong; the summarizer feeds that message into its corrective prompt.

use crate::error::InferenceError;
use crate::output::{ArticleBrief, DetectionResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeSet;

// ── Fences and invisible characters ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*\n(.*?)\n?```\s*$").unwrap());

/// Strip one outer code fence, normalise line endings, drop zero-width chars.
pub fn clean_reply(input: &str) -> String {
    let s = input
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace(['\u{200B}', '\u{FEFF}', '\u{200C}', '\u{200D}', '\u{2060}'], "");
    let trimmed = s.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].trim().to_string(),
        None => trimmed.to_string(),
    }
}

// ── Detection ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum DetectionReply {
    Object {
        pages: Vec<i64>,
        #[serde(default)]
        note: Option<String>,
    },
    Array(Vec<i64>),
}

static RE_JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());
static RE_JSON_ARRAY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\[[^\[\]]*\]").unwrap());

/// Parse a detection reply against the scanned range `[1, scanned]`.
///
/// Accepts `{"pages": [...], "note": "..."}` or a bare array, optionally
/// fenced or surrounded by prose. Any index outside the scanned range
/// invalidates the whole reply.
pub fn parse_detection(reply: &str, scanned: usize) -> Result<DetectionResult, InferenceError> {
    let text = clean_reply(reply);

    let parsed = serde_json::from_str::<DetectionReply>(&text)
        .ok()
        .or_else(|| {
            RE_JSON_OBJECT
                .find(&text)
                .and_then(|m| serde_json::from_str(m.as_str()).ok())
        })
        .or_else(|| {
            RE_JSON_ARRAY
                .find(&text)
                .and_then(|m| serde_json::from_str(m.as_str()).ok())
        })
        .ok_or_else(|| {
            InferenceError::malformed(format!(
                "detection reply is not a JSON page list: {}",
                truncate(&text, 120)
            ))
        })?;

    let (raw_pages, note) = match parsed {
        DetectionReply::Object { pages, note } => (pages, note),
        DetectionReply::Array(pages) => (pages, None),
    };

    let mut pages = BTreeSet::new();
    for p in raw_pages {
        if p < 1 || p as usize > scanned {
            return Err(InferenceError::malformed(format!(
                "page {p} is outside the scanned range 1-{scanned}"
            )));
        }
        pages.insert(p as usize);
    }

    Ok(DetectionResult {
        pages,
        confidence_note: note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
    })
}

// ── Briefs ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    CoreArgument,
    KeyEvidence,
    PolicyImplications,
}

impl Field {
    fn label(self) -> &'static str {
        match self {
            Field::CoreArgument => "Core Argument",
            Field::KeyEvidence => "Key Evidence",
            Field::PolicyImplications => "Policy Implications",
        }
    }
}

/// `* **Core Argument:** text`, `1. Key Data/Evidence: text`, `**Policy implications**: text`.
static RE_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:(?:[-*•+]|\d+[.)])\s*)?(?:\*\*|__)?\s*(core\s+argument|key\s+(?:data\s*/\s*)?evidence|policy\s+implications?)\s*(?::\s*(?:\*\*|__)|(?:\*\*|__)\s*:|:)\s*(.*)$",
    )
    .unwrap()
});

/// `#### Core Argument` (text on the next lines) or `### Key Evidence: text`.
static RE_FIELD_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*#{1,4}\s*(?:\*\*|__)?\s*(core\s+argument|key\s+(?:data\s*/\s*)?evidence|policy\s+implications?)\s*(?:\*\*|__)?\s*(?::\s*(?:\*\*|__)?\s*(.*?))?\s*#*\s*$",
    )
    .unwrap()
});

static RE_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*#{1,4}\s+(.+?)\s*#*\s*$").unwrap());

static RE_DECORATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\s*_\[\]]+|[\s*_\[\]]+$").unwrap());

#[derive(Default)]
struct Draft {
    title: Option<String>,
    core_argument: Vec<String>,
    key_evidence: Vec<String>,
    policy_implications: Vec<String>,
    current: Option<Field>,
}

impl Draft {
    fn has_fields(&self) -> bool {
        !(self.core_argument.is_empty()
            && self.key_evidence.is_empty()
            && self.policy_implications.is_empty())
    }

    fn push(&mut self, field: Field, text: &str) {
        let slot = match field {
            Field::CoreArgument => &mut self.core_argument,
            Field::KeyEvidence => &mut self.key_evidence,
            Field::PolicyImplications => &mut self.policy_implications,
        };
        let text = text.trim();
        if !text.is_empty() {
            slot.push(text.to_string());
        }
        self.current = Some(field);
    }

    fn finish(self, page: usize, index: usize) -> Result<ArticleBrief, InferenceError> {
        let name = self
            .title
            .clone()
            .unwrap_or_else(|| format!("article {}", index + 1));
        let missing: Vec<&str> = [
            (Field::CoreArgument, &self.core_argument),
            (Field::KeyEvidence, &self.key_evidence),
            (Field::PolicyImplications, &self.policy_implications),
        ]
        .iter()
        .filter(|(_, lines)| lines.is_empty())
        .map(|(f, _)| f.label())
        .collect();

        if !missing.is_empty() {
            return Err(InferenceError::malformed(format!(
                "'{}' is missing {}",
                name,
                missing.join(", ")
            )));
        }

        Ok(ArticleBrief {
            source_page: page,
            title: self.title,
            core_argument: self.core_argument.join("\n"),
            key_evidence: self.key_evidence.join("\n"),
            policy_implications: self.policy_implications.join("\n"),
        })
    }
}

fn field_from_label(label: &str) -> Field {
    let l = label.to_lowercase();
    if l.starts_with("core") {
        Field::CoreArgument
    } else if l.starts_with("key") {
        Field::KeyEvidence
    } else {
        Field::PolicyImplications
    }
}

/// Parse a brief reply for `page` into one brief per article.
///
/// Field labels are recognised first, whether written as list items or as
/// headings of their own. Other headings split articles; text before the first labelled
/// field of an article (and headings with no fields, such as a page title)
/// is ignored. The reply is rejected if it contains no article or if any
/// article lacks a non-empty Core Argument, Key Evidence or Policy
/// Implications.
pub fn parse_briefs(reply: &str, page: usize) -> Result<Vec<ArticleBrief>, InferenceError> {
    let text = clean_reply(reply);
    let mut drafts: Vec<Draft> = Vec::new();
    let mut draft = Draft::default();

    for line in text.lines() {
        let field_line = RE_FIELD_HEADING
            .captures(line)
            .or_else(|| RE_FIELD.captures(line));
        if let Some(caps) = field_line {
            let field = field_from_label(&caps[1]);
            // A repeated field starts the next, untitled article.
            let repeated = match field {
                Field::CoreArgument => !draft.core_argument.is_empty(),
                Field::KeyEvidence => !draft.key_evidence.is_empty(),
                Field::PolicyImplications => !draft.policy_implications.is_empty(),
            };
            if repeated && draft.current != Some(field) {
                drafts.push(std::mem::take(&mut draft));
            }
            draft.push(field, caps.get(2).map_or("", |m| m.as_str()));
            continue;
        }

        if let Some(caps) = RE_HEADING.captures(line) {
            if draft.has_fields() {
                drafts.push(std::mem::take(&mut draft));
            }
            let title = RE_DECORATION.replace_all(&caps[1], "").to_string();
            draft.title = (!title.is_empty()).then_some(title);
            draft.current = None;
            continue;
        }

        if line.trim().is_empty() {
            continue;
        }
        if let Some(field) = draft.current {
            draft.push(field, line);
        }
    }
    if draft.has_fields() {
        drafts.push(draft);
    }

    if drafts.is_empty() {
        return Err(InferenceError::malformed(format!(
            "no article with Core Argument / Key Evidence / Policy Implications found: {}",
            truncate(&text, 120)
        )));
    }

    drafts
        .into_iter()
        .enumerate()
        .map(|(i, d)| d.finish(page, i))
        .collect()
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_strips_json_fence() {
        assert_eq!(clean_reply("```json\n[6, 7]\n```"), "[6, 7]");
        assert_eq!(clean_reply("```\n[6]\n```\n"), "[6]");
        assert_eq!(clean_reply("  [1]  "), "[1]");
    }

    #[test]
    fn clean_removes_invisible_chars() {
        assert_eq!(clean_reply("\u{FEFF}[2]\u{200B}"), "[2]");
    }

    #[test]
    fn detection_object_with_note() {
        let r = parse_detection(r#"{"pages": [9], "note": "Editorial masthead on page 9"}"#, 12)
            .unwrap();
        assert_eq!(r.pages.into_iter().collect::<Vec<_>>(), vec![9]);
        assert_eq!(r.confidence_note.as_deref(), Some("Editorial masthead on page 9"));
    }

    #[test]
    fn detection_bare_array_fenced() {
        let r = parse_detection("```json\n[7, 6, 7]\n```", 12).unwrap();
        assert_eq!(r.pages.into_iter().collect::<Vec<_>>(), vec![6, 7]);
        assert!(r.confidence_note.is_none());
    }

    #[test]
    fn detection_array_inside_prose() {
        let r = parse_detection("Sure! The opinion pages are [10, 11].", 12).unwrap();
        assert_eq!(r.pages.len(), 2);
    }

    #[test]
    fn detection_empty_array_is_valid_and_empty() {
        assert!(parse_detection("[]", 12).unwrap().is_empty());
    }

    #[test]
    fn detection_out_of_range_is_rejected() {
        let err = parse_detection("[3, 13]", 12).unwrap_err();
        assert!(err.message.contains("13"), "got: {}", err.message);
        assert!(parse_detection("[0]", 12).is_err());
        // Scanned range is min(12, page_count).
        assert!(parse_detection("[5]", 4).is_err());
    }

    #[test]
    fn detection_garbage_is_rejected() {
        assert!(parse_detection("I could not find any editorial.", 12).is_err());
    }

    const TWO_ARTICLES: &str = "\
### The case for cheaper money
* **Core Argument:** The central bank should cut rates now.
* **Key Data/Evidence:**
  - Inflation fell to 2.1%.
  - Unemployment rose to 5%.
* **Policy Implications:** Treasury should prepare for lower yields.

### Fix the buses
* **Core Argument:** City transit is underfunded.
* **Key Evidence:** Ridership is up 12% since 2022.
* **Policy Implications:** Ring-fence the transport levy.
";

    #[test]
    fn briefs_two_articles() {
        let briefs = parse_briefs(TWO_ARTICLES, 9).unwrap();
        assert_eq!(briefs.len(), 2);
        assert_eq!(briefs[0].title.as_deref(), Some("The case for cheaper money"));
        assert_eq!(briefs[0].source_page, 9);
        assert!(briefs[0].key_evidence.contains("Inflation fell to 2.1%."));
        assert!(briefs[0].key_evidence.contains("Unemployment rose to 5%."));
        assert_eq!(briefs[1].core_argument, "City transit is underfunded.");
    }

    #[test]
    fn briefs_without_headings_or_bold() {
        let reply = "Core argument: Ban phones in class.\nKey evidence: Test scores rose.\nPolicy implications: Update school guidance.";
        let briefs = parse_briefs(reply, 4).unwrap();
        assert_eq!(briefs.len(), 1);
        assert!(briefs[0].title.is_none());
        assert_eq!(briefs[0].policy_implications, "Update school guidance.");
    }

    #[test]
    fn briefs_bold_label_with_colon_outside() {
        let reply = "### A\n**Core Argument**: x\n**Key Evidence**: y\n**Policy Implications**: z";
        assert_eq!(parse_briefs(reply, 1).unwrap()[0].key_evidence, "y");
    }

    #[test]
    fn briefs_with_heading_labels() {
        let reply = "\
### Water tariffs
#### Core Argument
Tariffs should rise with usage.
#### Key Evidence
Leakage costs 30% of supply.
#### Policy Implications: Index tariffs to consumption.
";
        let briefs = parse_briefs(reply, 6).unwrap();
        assert_eq!(briefs.len(), 1);
        assert_eq!(briefs[0].title.as_deref(), Some("Water tariffs"));
        assert_eq!(briefs[0].core_argument, "Tariffs should rise with usage.");
        assert_eq!(briefs[0].key_evidence, "Leakage costs 30% of supply.");
        assert_eq!(briefs[0].policy_implications, "Index tariffs to consumption.");
    }

    #[test]
    fn briefs_with_numbered_labels() {
        let reply = "### Ports\n1. **Core Argument:** x\n2) **Key Evidence:** y\n3. Policy Implications: z";
        let briefs = parse_briefs(reply, 1).unwrap();
        assert_eq!(briefs[0].key_evidence, "y");
        assert_eq!(briefs[0].policy_implications, "z");
    }

    #[test]
    fn heading_that_only_starts_with_a_label_is_a_title() {
        let reply = "### Key evidence of decline\n* **Core Argument:** x\n* **Key Evidence:** y\n* **Policy Implications:** z";
        let briefs = parse_briefs(reply, 1).unwrap();
        assert_eq!(briefs[0].title.as_deref(), Some("Key evidence of decline"));
    }

    #[test]
    fn briefs_page_title_heading_is_ignored() {
        let reply = format!("# Opinion\n\n{TWO_ARTICLES}");
        assert_eq!(parse_briefs(&reply, 9).unwrap().len(), 2);
    }

    #[test]
    fn briefs_missing_field_rejects_reply() {
        let reply = "### Lonely\n* **Core Argument:** x\n* **Key Evidence:** y";
        let err = parse_briefs(reply, 2).unwrap_err();
        assert!(err.message.contains("'Lonely' is missing Policy Implications"), "{}", err.message);
    }

    #[test]
    fn briefs_empty_field_rejects_reply() {
        let reply = "* **Core Argument:**\n* **Key Evidence:** y\n* **Policy Implications:** z";
        assert!(parse_briefs(reply, 2).is_err());
    }

    #[test]
    fn briefs_no_articles_rejects_reply() {
        let err = parse_briefs("I cannot read this page.", 2).unwrap_err();
        assert!(err.message.contains("no article"));
    }

    #[test]
    fn truncate_is_char_safe() {
        assert_eq!(truncate("éééé", 2), "éé…");
        assert_eq!(truncate("ab", 5), "ab");
    }
}
