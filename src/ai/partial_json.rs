//! Turns the prefix of a JSON document into a complete document.
//!
//! Streaming responses arrive as text deltas; after each delta the accumulated text is a
//! truncated JSON object. [`complete`] cuts it back to the last point where closing the
//! open containers yields valid JSON, keeping an unfinished string value as-is. Keys with
//! no value yet are dropped, so a field only appears once its value has started.

struct Frame {
    closer: char,
    expect_key: bool,
}

fn closers(stack: &[Frame]) -> String {
    stack.iter().rev().map(|f| f.closer).collect()
}

fn is_delimiter(c: char) -> bool {
    matches!(c, ',' | '}' | ']') || c.is_whitespace()
}

/// Completes a truncated JSON document, or `None` if no prefix of it is usable.
/// Leading text before the first `{` or `[` is ignored, as is anything after the
/// top-level value closes.
pub fn complete(input: &str) -> Option<String> {
    let begin = input.find(['{', '['])?;
    let input = &input[begin..];

    let mut stack: Vec<Frame> = Vec::new();
    let mut safe: Option<String> = None;
    let mut chars = input.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '{' | '[' => {
                stack.push(Frame {
                    closer: if c == '{' { '}' } else { ']' },
                    expect_key: c == '{',
                });
                safe = Some(format!("{}{}", &input[..=i], closers(&stack)));
            }
            '}' | ']' => {
                stack.pop();
                if stack.is_empty() {
                    return Some(input[..=i].to_string());
                }
                safe = Some(format!("{}{}", &input[..=i], closers(&stack)));
            }
            ':' => {
                if let Some(top) = stack.last_mut() {
                    top.expect_key = false;
                }
            }
            ',' => {
                if let Some(top) = stack.last_mut() {
                    top.expect_key = top.closer == '}';
                }
            }
            '"' => {
                let is_key = stack.last().is_some_and(|f| f.expect_key);
                let mut escaped = false;
                let mut pending_hex = 0u8;
                let mut clean_end = i + 1;
                let mut end = None;

                for (j, d) in chars.by_ref() {
                    if pending_hex > 0 {
                        pending_hex -= 1;
                        if pending_hex == 0 {
                            clean_end = j + d.len_utf8();
                        }
                    } else if escaped {
                        escaped = false;
                        if d == 'u' {
                            pending_hex = 4;
                        } else {
                            clean_end = j + d.len_utf8();
                        }
                    } else if d == '\\' {
                        escaped = true;
                    } else if d == '"' {
                        end = Some(j + 1);
                        break;
                    } else {
                        clean_end = j + d.len_utf8();
                    }
                }

                match (end, is_key) {
                    (Some(_), true) => {}
                    (Some(end), false) => {
                        safe = Some(format!("{}{}", &input[..end], closers(&stack)));
                    }
                    (None, true) => return safe,
                    (None, false) => {
                        return Some(format!("{}\"{}", &input[..clean_end], closers(&stack)));
                    }
                }
            }
            _ => {
                let mut end = None;
                while let Some(&(j, d)) = chars.peek() {
                    if is_delimiter(d) {
                        end = Some(j);
                        break;
                    }
                    chars.next();
                }
                // A number or literal at the very end may still be growing.
                let Some(end) = end else {
                    return safe;
                };
                if serde_json::from_str::<serde_json::Value>(&input[i..end]).is_err() {
                    return None;
                }
                safe = Some(format!("{}{}", &input[..end], closers(&stack)));
            }
        }
    }

    safe
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::ai::regressed_fields;
    use crate::models::PartialSummary;

    fn parsed(input: &str) -> Value {
        serde_json::from_str(&complete(input).unwrap()).unwrap()
    }

    #[test]
    fn closes_open_string_and_containers() {
        assert_eq!(
            parsed(r#"{"headline":"Markets ra"#),
            json!({"headline": "Markets ra"})
        );
        assert_eq!(
            parsed(r#"{"highlights":["one","tw"#),
            json!({"highlights": ["one", "tw"]})
        );
    }

    #[test]
    fn drops_keys_without_values() {
        assert_eq!(parsed(r#"{"headline":"A","summ"#), json!({"headline": "A"}));
        assert_eq!(parsed(r#"{"headline":"A","summaryText":"#), json!({"headline": "A"}));
        assert_eq!(parsed(r#"{"headline":"A","#), json!({"headline": "A"}));
        assert_eq!(parsed("{"), json!({}));
    }

    #[test]
    fn never_cuts_inside_an_escape() {
        assert_eq!(parsed(r#"{"headline":"a\"#), json!({"headline": "a"}));
        assert_eq!(parsed(r#"{"headline":"a\u00"#), json!({"headline": "a"}));
        assert_eq!(parsed(r#"{"headline":"aé"#), json!({"headline": "aé"}));
        assert_eq!(parsed(r#"{"headline":"a\n"#), json!({"headline": "a\n"}));
    }

    #[test]
    fn ignores_surrounding_text() {
        assert_eq!(
            parsed("Here you go:\n```json\n{\"headline\":\"A\"}\n```"),
            json!({"headline": "A"})
        );
        assert!(complete("no json here").is_none());
    }

    #[test]
    fn trailing_literal_waits_for_delimiter() {
        assert_eq!(parsed(r#"{"a":"x","n":12"#), json!({"a": "x"}));
        assert_eq!(parsed(r#"{"a":"x","n":12,"#), json!({"a": "x", "n": 12}));
    }

    #[test]
    fn every_prefix_decodes_monotonically() {
        let full = json!({
            "headline": "Rates hold",
            "summaryText": "The bank kept rates at 4%, citing \"sticky\" inflation.",
            "highlights": ["Vote was 7-2", "Next meeting in December"],
            "icon": "🏦",
            "callToAction": "Read more"
        })
        .to_string();

        let mut prev = PartialSummary::default();
        for (end, _) in full.char_indices().skip(1) {
            let Some(doc) = complete(&full[..end]) else {
                continue;
            };
            let next: PartialSummary = serde_json::from_str(&doc).unwrap();
            assert!(
                regressed_fields(&prev, &next).is_empty(),
                "regressed at prefix {:?}",
                &full[..end]
            );
            prev = next;
        }

        let last: PartialSummary = serde_json::from_str(&complete(&full).unwrap()).unwrap();
        assert_eq!(last.highlights.unwrap().len(), 2);
        assert_eq!(last.icon.as_deref(), Some("🏦"));
    }
}
