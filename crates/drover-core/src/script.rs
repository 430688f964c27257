//! Script parsing and the instruction queue model
//!
//! One instruction per line; blank lines are ignored. A fixed, ordered
//! rule table maps each line to an [`Instruction`] — first match wins.
//! Parsing is pure and total: an unmatched non-empty, non-comment line
//! becomes [`InstructionKind::Unknown`] with its raw text preserved, so
//! the engine can raise a specific "command not found" failure instead
//! of silently no-oping.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// A selector payload with an optional ` with <content>` clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// CSS-ish selector (id, class, attribute, pseudo-class forms)
    pub selector: String,
    /// Expected content; matched against trimmed text, then input
    /// value, then placeholder — first present non-empty one wins
    pub content: Option<String>,
}

impl Target {
    /// Create a target without a content clause.
    #[must_use]
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            content: None,
        }
    }

    /// Create a target with a content clause.
    #[must_use]
    pub fn with_content(selector: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            content: Some(content.into()),
        }
    }
}

/// The classified form of one script line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstructionKind {
    /// Block for the given duration; always succeeds
    Wait { ms: u64 },
    /// Click the first matching element
    Click { target: Target },
    /// Type literal text into the target (or the focused element)
    Type { text: String, target: Option<Target> },
    /// Alias of `type`, intended for select-style inputs
    Choose { text: String, target: Option<Target> },
    /// Assert a matching element exists and is visible
    Find { target: Target },
    /// Assert no matching element is visible
    DontFind { target: Target },
    /// Reload the page
    Reload,
    /// Navigate unconditionally; completes immediately
    Visit { href: String },
    /// Navigate until the current path matches; completes only then
    Goto { href: String },
    /// Wipe page storage, preserving engine state, then reload
    ClearStorage,
    /// Expire cookies, then reload
    ClearCookies,
    /// Both of the above
    ClearAll,
    /// Resize the window
    Resize { width: u32, height: u32 },
    /// Pure annotation; consumed by failure diagnostics
    Name { label: String },
    /// `//` comment; auto-completed, no side effects
    Comment,
    /// Fetch a remote instruction document and run it
    Test,
    /// Block until an operator signals resume
    Intervention { message: String },
    /// Unclassifiable line; fatal when executed
    Unknown,
}

/// One parsed step of an automation script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Canonical (trimmed) source line
    pub raw: String,
    /// Classified form
    pub kind: InstructionKind,
    /// Completion flag; monotonic false→true, never re-attempted once set
    #[serde(default)]
    pub done: bool,
    /// Attempts made so far; each instruction owns its own counter, so
    /// one flaky step never consumes a later step's allowance
    #[serde(default)]
    pub attempts: u32,
}

impl Instruction {
    fn new(raw: &str, kind: InstructionKind) -> Self {
        Self {
            raw: raw.to_string(),
            kind,
            done: false,
            attempts: 0,
        }
    }
}

/// The persisted, ordered list of instructions for the current run.
///
/// Execution order is insertion order; at most one instruction is in
/// flight at any time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Queue {
    pub items: Vec<Instruction>,
}

impl Queue {
    /// Index of the first not-done instruction, if any.
    #[must_use]
    pub fn next_pending(&self) -> Option<usize> {
        self.items.iter().position(|i| !i.done)
    }

    /// True when the queue holds work still to be done.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.next_pending().is_some()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Soft-stop: mark every instruction done so the next tick observes
    /// an empty queue and stops.
    pub fn mark_all_done(&mut self) {
        for item in &mut self.items {
            item.done = true;
        }
    }

    /// Reset every instruction for a fresh run.
    pub fn reset_all(&mut self) {
        for item in &mut self.items {
            item.done = false;
            item.attempts = 0;
        }
    }

    /// True when any instruction is a `resize` step (resume policy hook).
    #[must_use]
    pub fn has_resize(&self) -> bool {
        self.items
            .iter()
            .any(|i| matches!(i.kind, InstructionKind::Resize { .. }))
    }

    /// Render the queue back to script text, one raw line per step.
    #[must_use]
    pub fn to_script(&self) -> String {
        let mut out = String::new();
        for item in &self.items {
            out.push_str(&item.raw);
            out.push('\n');
        }
        out
    }
}

/// Selector fragment shared by all selector-bearing rules: id/class
/// prefixes, attribute selectors, pseudo-classes with optional
/// arguments, and `>` child combinators. Attribute values containing
/// `]` are unsupported.
const SELECTOR: &str = r"(?:[.#]?[A-Za-z0-9_-]*(?::[A-Za-z0-9_-]+(?:\([^)]*\))?|\[[^\]]*\])?>?)+";

type Build = fn(&Captures<'_>) -> Option<InstructionKind>;

struct Rule {
    regex: Regex,
    build: Build,
}

fn target_from(caps: &Captures<'_>) -> Option<Target> {
    let selector = caps.name("sel")?.as_str().trim().to_string();
    if selector.is_empty() {
        return None;
    }
    Some(Target {
        selector,
        content: caps.name("with").map(|m| m.as_str().to_string()),
    })
}

/// The one declarative rule table, tried in priority order.
static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    let rule = |pattern: &str, build: Build| Rule {
        regex: Regex::new(pattern).expect("rule pattern is valid"),
        build,
    };
    vec![
        rule(r"^wait\s+(?P<ms>\d+)$", |caps| {
            Some(InstructionKind::Wait {
                ms: caps["ms"].parse().ok()?,
            })
        }),
        rule(
            &format!(r"^click\s+(?P<sel>{SELECTOR})(?:\s+with\s+(?P<with>.+))?$"),
            |caps| {
                Some(InstructionKind::Click {
                    target: target_from(caps)?,
                })
            },
        ),
        rule(
            &format!(
                r"^(?P<cmd>type|choose)\s+\[(?P<text>[^\]]*)\](?:\s+in\s+(?P<sel>{SELECTOR})(?:\s+with\s+(?P<with>.+))?)?$"
            ),
            |caps| {
                let text = caps["text"].to_string();
                let target = match caps.name("sel") {
                    Some(_) => Some(target_from(caps)?),
                    None => None,
                };
                Some(if &caps["cmd"] == "choose" {
                    InstructionKind::Choose { text, target }
                } else {
                    InstructionKind::Type { text, target }
                })
            },
        ),
        rule(
            &format!(r"^don'?t\s+find\s+(?P<sel>{SELECTOR})(?:\s+with\s+(?P<with>.+))?$"),
            |caps| {
                Some(InstructionKind::DontFind {
                    target: target_from(caps)?,
                })
            },
        ),
        rule(
            &format!(r"^find\s+(?P<sel>{SELECTOR})(?:\s+with\s+(?P<with>.+))?$"),
            |caps| {
                Some(InstructionKind::Find {
                    target: target_from(caps)?,
                })
            },
        ),
        rule(r"^name\s+(?P<label>.+)$", |caps| {
            Some(InstructionKind::Name {
                label: caps["label"].to_string(),
            })
        }),
        rule(r"^reload$", |_| Some(InstructionKind::Reload)),
        rule(r"^visit\s+(?P<href>\S+)$", |caps| {
            Some(InstructionKind::Visit {
                href: caps["href"].to_string(),
            })
        }),
        rule(r"^goto\s+(?P<href>\S+)$", |caps| {
            Some(InstructionKind::Goto {
                href: caps["href"].to_string(),
            })
        }),
        rule(r"^clear\s+(?P<what>storage|cookies|all)$", |caps| {
            Some(match &caps["what"] {
                "storage" => InstructionKind::ClearStorage,
                "cookies" => InstructionKind::ClearCookies,
                _ => InstructionKind::ClearAll,
            })
        }),
        rule(r"^resize\s+(?P<w>\d+)\s+(?P<h>\d+)$", |caps| {
            Some(InstructionKind::Resize {
                width: caps["w"].parse().ok()?,
                height: caps["h"].parse().ok()?,
            })
        }),
        rule(r"^intervention\s+(?P<msg>.+)$", |caps| {
            Some(InstructionKind::Intervention {
                message: caps["msg"].to_string(),
            })
        }),
        rule(r"^test$", |_| Some(InstructionKind::Test)),
    ]
});

/// Progress markers the original UI prepends when rendering a running
/// queue; stripped so a rendered queue round-trips through the parser.
const PROGRESS_MARKERS: [&str; 3] = ["🛠️ ", "✅ ", "😴 "];

/// Parse one pre-trimmed line into an instruction. Pure and total:
/// identical text yields an identical instruction, and no input panics.
#[must_use]
pub fn parse_line(line: &str) -> Instruction {
    let raw = line.trim();
    if raw.starts_with("//") {
        return Instruction::new(raw, InstructionKind::Comment);
    }
    for rule in RULES.iter() {
        if let Some(caps) = rule.regex.captures(raw) {
            if let Some(kind) = (rule.build)(&caps) {
                return Instruction::new(raw, kind);
            }
        }
    }
    Instruction::new(raw, InstructionKind::Unknown)
}

/// Parse a whole script: trim lines, drop empties, strip progress
/// markers, and classify each remaining line.
#[must_use]
pub fn parse_script(text: &str) -> Queue {
    let items = text
        .lines()
        .map(|line| {
            let mut line = line.trim();
            for marker in PROGRESS_MARKERS {
                line = line.strip_prefix(marker).unwrap_or(line);
            }
            line
        })
        .filter(|line| !line.is_empty())
        .map(parse_line)
        .collect();
    Queue { items }
}

/// The command reference shown by `drover commands`.
pub const COMMAND_REFERENCE: &str = r#"wait <ms>
        Blocks and waits <ms> milliseconds.
        Example: wait 2000

click <selector> [with <content>]
        Clicks the first element matching the selector, optionally
        checking its content/value.
        Example: click [id="some-id"]
        Example: click [id="some-id"] with Checkout

type [<text>] in <selector> [with <content>]
choose [<text>] in <selector> [with <content>]
        Types text into the matching element. choose is an alias meant
        for select inputs. Without an `in` clause, types into the
        focused element.
        Example: type [42] in [id="some-id"]
        Example: choose [2] in [id="some-id"]

find <selector> [with <content>]
        Ensures a matching element exists and is visible.
        Example: find [id="some-id"] with 42

don't find <selector> [with <content>]
        Ensures no matching element is visible.
        Example: don't find .error-banner

name <label>
        Pure annotation; failure reports cite the nearest preceding
        name as a location label.

reload
        Reloads the page.

resize <width> <height>
        Resizes the window to the given dimensions.
        Example: resize 800 600

visit <path-or-url>
        Navigates without any checks and completes immediately. Useful
        for URLs with redirects.
        Example: visit /products

goto <path-or-url>
        Like visit, but only completes once the current path matches;
        otherwise it navigates again on the next attempt.
        Example: goto /products

clear storage|cookies|all
        Clears page storage, cookies, or both, then reloads. Engine
        state survives the wipe.

intervention <message>
        Blocks until an operator manually resumes the run.
        Example: intervention upload file for product

test
        Fetches a remote newline-delimited instruction document and
        starts a run from it.

// <comment>
        Annotation; completes with no side effects.
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_of(line: &str) -> InstructionKind {
        parse_line(line).kind
    }

    #[test]
    fn parses_wait() {
        assert_eq!(kind_of("wait 500"), InstructionKind::Wait { ms: 500 });
    }

    #[test]
    fn wait_overflow_is_unknown() {
        assert_eq!(
            kind_of("wait 99999999999999999999999999"),
            InstructionKind::Unknown
        );
    }

    #[test]
    fn parses_click_with_selector_forms() {
        assert_eq!(
            kind_of("click #submit"),
            InstructionKind::Click {
                target: Target::new("#submit")
            }
        );
        assert_eq!(
            kind_of(r#"click [id="some-id"]"#),
            InstructionKind::Click {
                target: Target::new(r#"[id="some-id"]"#)
            }
        );
        assert_eq!(
            kind_of(".cart>button:nth-child(2)"),
            InstructionKind::Unknown,
            "selector alone is not a command"
        );
        assert_eq!(
            kind_of("click .cart>button:nth-child(2)"),
            InstructionKind::Click {
                target: Target::new(".cart>button:nth-child(2)")
            }
        );
    }

    #[test]
    fn parses_click_with_content_clause() {
        assert_eq!(
            kind_of(r#"click [id="some-id"] with Checkout"#),
            InstructionKind::Click {
                target: Target::with_content(r#"[id="some-id"]"#, "Checkout")
            }
        );
        // Content may contain spaces
        assert_eq!(
            kind_of("click #btn with Add to cart"),
            InstructionKind::Click {
                target: Target::with_content("#btn", "Add to cart")
            }
        );
    }

    #[test]
    fn parses_type_and_choose() {
        assert_eq!(
            kind_of("type [hello world] in #name"),
            InstructionKind::Type {
                text: "hello world".to_string(),
                target: Some(Target::new("#name")),
            }
        );
        assert_eq!(
            kind_of("choose [2] in #quantity with 1"),
            InstructionKind::Choose {
                text: "2".to_string(),
                target: Some(Target::with_content("#quantity", "1")),
            }
        );
    }

    #[test]
    fn type_without_selector_targets_focused_element() {
        assert_eq!(
            kind_of("type [42]"),
            InstructionKind::Type {
                text: "42".to_string(),
                target: None,
            }
        );
    }

    #[test]
    fn type_text_may_be_empty() {
        assert_eq!(
            kind_of("type [] in #name"),
            InstructionKind::Type {
                text: String::new(),
                target: Some(Target::new("#name")),
            }
        );
    }

    #[test]
    fn parses_find_and_dont_find() {
        assert_eq!(
            kind_of("find .success"),
            InstructionKind::Find {
                target: Target::new(".success")
            }
        );
        assert_eq!(
            kind_of("dont find .error"),
            InstructionKind::DontFind {
                target: Target::new(".error")
            }
        );
        assert_eq!(
            kind_of("don't find .error with Oops"),
            InstructionKind::DontFind {
                target: Target::with_content(".error", "Oops")
            }
        );
    }

    #[test]
    fn parses_navigation_kinds() {
        assert_eq!(kind_of("reload"), InstructionKind::Reload);
        assert_eq!(
            kind_of("visit /products"),
            InstructionKind::Visit {
                href: "/products".to_string()
            }
        );
        assert_eq!(
            kind_of("goto /cart"),
            InstructionKind::Goto {
                href: "/cart".to_string()
            }
        );
    }

    #[test]
    fn parses_clear_variants() {
        assert_eq!(kind_of("clear storage"), InstructionKind::ClearStorage);
        assert_eq!(kind_of("clear cookies"), InstructionKind::ClearCookies);
        assert_eq!(kind_of("clear all"), InstructionKind::ClearAll);
        assert_eq!(kind_of("clear everything"), InstructionKind::Unknown);
    }

    #[test]
    fn parses_resize_name_intervention_test() {
        assert_eq!(
            kind_of("resize 800 600"),
            InstructionKind::Resize {
                width: 800,
                height: 600
            }
        );
        assert_eq!(
            kind_of("name checkout.flow"),
            InstructionKind::Name {
                label: "checkout.flow".to_string()
            }
        );
        assert_eq!(
            kind_of("intervention upload the product image"),
            InstructionKind::Intervention {
                message: "upload the product image".to_string()
            }
        );
        assert_eq!(kind_of("test"), InstructionKind::Test);
    }

    #[test]
    fn comments_and_unknowns() {
        assert_eq!(kind_of("// just a note"), InstructionKind::Comment);
        assert_eq!(kind_of("clik #submit"), InstructionKind::Unknown);
        assert_eq!(kind_of("wait"), InstructionKind::Unknown);
        assert_eq!(kind_of("click"), InstructionKind::Unknown);
    }

    #[test]
    fn parse_is_deterministic() {
        let line = "click #submit with Buy now";
        assert_eq!(parse_line(line), parse_line(line));
    }

    #[test]
    fn parse_script_filters_blanks_and_strips_markers() {
        let queue = parse_script("  \n🛠️ click #a\n\n😴 wait 10\n✅ find .b\n");
        assert_eq!(queue.items.len(), 3);
        assert_eq!(queue.items[0].raw, "click #a");
        assert_eq!(queue.items[1].raw, "wait 10");
        assert_eq!(queue.items[2].raw, "find .b");
        assert!(queue.items.iter().all(|i| !i.done && i.attempts == 0));
    }

    #[test]
    fn queue_helpers() {
        let mut queue = parse_script("click #a\nresize 800 600\nfind .b");
        assert!(queue.has_resize());
        assert_eq!(queue.next_pending(), Some(0));
        queue.items[0].done = true;
        assert_eq!(queue.next_pending(), Some(1));
        queue.mark_all_done();
        assert!(!queue.is_active());
        queue.reset_all();
        assert_eq!(queue.next_pending(), Some(0));
        assert_eq!(queue.to_script(), "click #a\nresize 800 600\nfind .b\n");
    }

    #[test]
    fn queue_serialization_round_trips() {
        let mut queue = parse_script("click #a\nwait 10");
        queue.items[0].done = true;
        queue.items[1].attempts = 3;
        let json = serde_json::to_string(&queue).expect("serialize");
        let restored: Queue = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(queue, restored);
    }
}
