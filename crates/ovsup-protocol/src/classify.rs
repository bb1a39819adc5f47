//! Ordered classification of management output.
//!
//! Patterns are tried in a fixed priority order and the first one that
//! matches anywhere in the fragment wins. The order matters: a partially
//! received table dump and a single-line notice can both be present in
//! the same fragment, and the dump must take precedence.

use std::ops::Range;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::message::{ClientListDump, ManagementMessage, MessageKind};

/// Pattern sources in priority order.
const PATTERN_SOURCES: &[(MessageKind, &str)] = &[
    (
        MessageKind::ClientList,
        r"(?s)OpenVPN CLIENT LIST\nUpdated,([^\n]*)\n(.*?)\nROUTING TABLE\n(.*?)\nGLOBAL STATS\n(.*?)\nEND(?:\n|$)",
    ),
    (MessageKind::ClientEnvEnd, r"(?m)^>CLIENT:ENV,END$"),
    (MessageKind::ClientEnv, r"(?m)^>CLIENT:ENV,([^=\r\n]+)=([^\r\n]*)$"),
    (MessageKind::ClientConnect, r"(?m)^>CLIENT:CONNECT,(\d+),(\d+)$"),
    (MessageKind::ClientReauth, r"(?m)^>CLIENT:REAUTH,(\d+),(\d+)$"),
    (MessageKind::ClientEstablished, r"(?m)^>CLIENT:ESTABLISHED,(\d+)$"),
    (MessageKind::ClientDisconnect, r"(?m)^>CLIENT:DISCONNECT,(\d+)$"),
    (
        MessageKind::ClientAddress,
        r"(?m)^>CLIENT:ADDRESS,(\d+),([^,\r\n]+),(\d+)$",
    ),
    (MessageKind::Log, r"(?m)^>LOG:([^\r\n]*)$"),
    (MessageKind::Info, r"(?m)^>INFO:([^\r\n]*)$"),
    (MessageKind::Hold, r"(?m)^>HOLD:([^\r\n]*)$"),
    (MessageKind::State, r"(?m)^>STATE:([^\r\n]*)$"),
    (
        MessageKind::UpDown,
        r"(?m)^>UPDOWN:([^=,\r\n]+),([^=\r\n]+)=([^\r\n]*)$",
    ),
    (MessageKind::UpDownPhase, r"(?m)^>UPDOWN:([^=\r\n]+)$"),
    (MessageKind::Fatal, r"(?m)^>?FATAL:([^\r\n]*)$"),
    (MessageKind::Error, r"(?m)^>?ERROR:([^\r\n]*)$"),
    (MessageKind::Success, r"(?m)^SUCCESS: ?([^\r\n]*)$"),
    (MessageKind::Unrecognized, r"(?m)^>([A-Z][A-Z0-9_-]*):([^\r\n]*)$"),
];

struct Pattern {
    kind: MessageKind,
    regex: Regex,
}

// Sources are constant; `test_all_patterns_compile` guards against a
// pattern silently dropping out of the table.
static PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    PATTERN_SOURCES
        .iter()
        .filter_map(|(kind, source)| {
            Regex::new(source).ok().map(|regex| Pattern {
                kind: *kind,
                regex,
            })
        })
        .collect()
});

/// A classified message and the byte range of the fragment it consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub message: ManagementMessage,
    pub span: Range<usize>,
}

/// Classifies a buffered fragment.
///
/// Returns the first match in priority order, or `None` if no pattern
/// matches. Text before `span.start` is framing slack; text after
/// `span.end` belongs to the next message.
pub fn classify(fragment: &str) -> Option<Classified> {
    PATTERNS.iter().find_map(|pattern| {
        let caps = pattern.regex.captures(fragment)?;
        let whole = caps.get(0)?;
        let message = build(pattern.kind, &caps)?;
        Some(Classified {
            message,
            span: whole.range(),
        })
    })
}

fn text(caps: &Captures<'_>, index: usize) -> Option<String> {
    caps.get(index).map(|m| m.as_str().to_string())
}

fn number(caps: &Captures<'_>, index: usize) -> Option<u64> {
    caps.get(index)?.as_str().parse().ok()
}

fn build(kind: MessageKind, caps: &Captures<'_>) -> Option<ManagementMessage> {
    let message = match kind {
        MessageKind::ClientList => ManagementMessage::ClientList(ClientListDump {
            updated: text(caps, 1)?,
            clients: text(caps, 2)?,
            routes: text(caps, 3)?,
            stats: text(caps, 4)?,
        }),
        MessageKind::ClientEnvEnd => ManagementMessage::ClientEnvEnd,
        MessageKind::ClientEnv => ManagementMessage::ClientEnv {
            key: text(caps, 1)?,
            value: text(caps, 2)?,
        },
        MessageKind::ClientConnect => ManagementMessage::ClientConnect {
            cid: number(caps, 1)?,
            kid: number(caps, 2)?,
        },
        MessageKind::ClientReauth => ManagementMessage::ClientReauth {
            cid: number(caps, 1)?,
            kid: number(caps, 2)?,
        },
        MessageKind::ClientEstablished => ManagementMessage::ClientEstablished {
            cid: number(caps, 1)?,
        },
        MessageKind::ClientDisconnect => ManagementMessage::ClientDisconnect {
            cid: number(caps, 1)?,
        },
        MessageKind::ClientAddress => ManagementMessage::ClientAddress {
            cid: number(caps, 1)?,
            address: text(caps, 2)?,
            primary: number(caps, 3)? == 1,
        },
        MessageKind::Log => ManagementMessage::Log(text(caps, 1)?),
        MessageKind::Info => ManagementMessage::Info(text(caps, 1)?),
        MessageKind::Hold => ManagementMessage::Hold(text(caps, 1)?),
        MessageKind::State => ManagementMessage::State(text(caps, 1)?),
        MessageKind::UpDown => ManagementMessage::UpDown {
            phase: text(caps, 1)?,
            key: text(caps, 2)?,
            value: text(caps, 3)?,
        },
        MessageKind::UpDownPhase => ManagementMessage::UpDownPhase(text(caps, 1)?),
        MessageKind::Fatal => ManagementMessage::Fatal(text(caps, 1)?),
        MessageKind::Error => ManagementMessage::Error(text(caps, 1)?),
        MessageKind::Success => ManagementMessage::Success(text(caps, 1)?),
        MessageKind::Unrecognized => ManagementMessage::Unrecognized {
            kind: text(caps, 1)?,
            payload: text(caps, 2)?,
        },
    };
    Some(message)
}
