//! Line buffering and resynchronization.
//!
//! The management interface is read one line at a time, but a `status`
//! dump spans many lines and only classifies once its `END` marker has
//! arrived. Each line is first classified on its own; if that fails it is
//! appended to the pending buffer with a line terminator and the whole
//! buffer is classified once more. Unmatched text stays pending until a
//! later match makes it leading slack, which is discarded and reported.

use crate::classify::classify;
use crate::message::ManagementMessage;

/// Upper bound on buffered, unmatched text.
pub const MAX_PENDING_BYTES: usize = 1_048_576;

/// Output of feeding one line to a [`FrameBuffer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A classified message
    Message {
        message: ManagementMessage,
        /// Unmatched text that preceded the message and was dropped
        skipped: Option<String>,
    },

    /// Pending text exceeded [`MAX_PENDING_BYTES`] and was dropped
    Overflow { discarded: usize },
}

/// Accumulates protocol lines until they classify.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: String,
}

impl FrameBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Text received but not classified yet.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Feeds one line (without its terminator) and returns every frame
    /// that became complete.
    ///
    /// A "line" may itself contain embedded newlines when the caller
    /// received several lines at once; each of them is fed in turn, so the
    /// result is the same as feeding them one by one.
    pub fn push_line(&mut self, line: &str) -> Vec<Frame> {
        let mut frames = Vec::new();
        for piece in line.split('\n').map(|piece| piece.trim_end_matches('\r')) {
            self.push_single(piece, &mut frames);
        }
        frames
    }

    fn push_single(&mut self, line: &str, frames: &mut Vec<Frame>) {
        // Blank lines carry no protocol content
        if line.trim().is_empty() {
            return;
        }

        let rest = drain(line, frames);
        if rest.is_empty() {
            return;
        }

        // Retry once with everything buffered so far
        self.pending.push_str(&rest);
        self.pending.push('\n');
        let pending = std::mem::take(&mut self.pending);
        self.pending = drain(&pending, frames);

        if self.pending.len() > MAX_PENDING_BYTES {
            frames.push(Frame::Overflow {
                discarded: self.pending.len(),
            });
            self.pending.clear();
        }
    }
}

/// Classifies `text` repeatedly, returning whatever did not match.
fn drain(text: &str, frames: &mut Vec<Frame>) -> String {
    let mut rest = text;

    while let Some(found) = classify(rest) {
        let skipped = rest
            .get(..found.span.start)
            .map(|slack| slack.trim_matches(|c: char| c == '\n' || c == '\0'))
            .filter(|slack| !slack.is_empty())
            .map(str::to_string);

        frames.push(Frame::Message {
            message: found.message,
            skipped,
        });

        rest = rest
            .get(found.span.end..)
            .unwrap_or_default()
            .trim_start_matches(|c: char| c == '\n' || c == '\0');
    }

    rest.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ClientListDump;

    const CLIENT_LIST_LINES: &[&str] = &[
        "OpenVPN CLIENT LIST",
        "Updated, Thu Feb 13 23:39:20 2014",
        "Common Name,Real Address,Bytes Received,Bytes Sent,Connected Since",
        "VPN_client,10.13.156.4:1194,12563,14885,Thu Feb 13 23:39:20 2014",
        "ROUTING TABLE",
        "Virtual Address,Common Name,Real Address,Last Ref",
        "192.168.11.4,VPN_client,10.13.156.4:1194,Thu Feb 13 23:39:20 2014",
        "GLOBAL STATS",
        "Max bcast/mcast queue length,0",
        "END",
    ];

    fn expected_dump() -> ClientListDump {
        ClientListDump {
            updated: " Thu Feb 13 23:39:20 2014".to_string(),
            clients: "Common Name,Real Address,Bytes Received,Bytes Sent,Connected Since\n\
                      VPN_client,10.13.156.4:1194,12563,14885,Thu Feb 13 23:39:20 2014"
                .to_string(),
            routes: "Virtual Address,Common Name,Real Address,Last Ref\n\
                     192.168.11.4,VPN_client,10.13.156.4:1194,Thu Feb 13 23:39:20 2014"
                .to_string(),
            stats: "Max bcast/mcast queue length,0".to_string(),
        }
    }

    fn messages(frames: Vec<Frame>) -> Vec<ManagementMessage> {
        frames
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::Message { message, .. } => Some(message),
                Frame::Overflow { .. } => None,
            })
            .collect()
    }

    fn feed_all(buffer: &mut FrameBuffer, lines: &[&str]) -> Vec<ManagementMessage> {
        lines
            .iter()
            .flat_map(|line| messages(buffer.push_line(line)))
            .collect()
    }

    #[test]
    fn test_client_list_line_by_line() {
        let mut buffer = FrameBuffer::new();
        let (last, head) = CLIENT_LIST_LINES.split_last().unwrap();

        assert!(feed_all(&mut buffer, head).is_empty());
        assert!(!buffer.is_empty());

        let result = messages(buffer.push_line(last));
        assert_eq!(result, vec![ManagementMessage::ClientList(expected_dump())]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_client_list_with_blank_lines() {
        let mut buffer = FrameBuffer::new();
        let mut lines: Vec<&str> = Vec::new();
        for line in CLIENT_LIST_LINES.iter().copied() {
            lines.push(line);
            if line == "ROUTING TABLE" || line.starts_with("192.168") {
                lines.push("");
            }
        }

        let result = feed_all(&mut buffer, &lines);
        assert_eq!(result, vec![ManagementMessage::ClientList(expected_dump())]);
    }

    #[test]
    fn test_client_list_merged() {
        let mut buffer = FrameBuffer::new();
        let merged = CLIENT_LIST_LINES.join("\n");

        let result = messages(buffer.push_line(&merged));
        assert_eq!(result, vec![ManagementMessage::ClientList(expected_dump())]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_client_list_partially_merged() {
        for split in 1..CLIENT_LIST_LINES.len() {
            let mut buffer = FrameBuffer::new();
            let (head, tail) = CLIENT_LIST_LINES.split_at(split);
            let merged_head = head.join("\n");

            let mut result = messages(buffer.push_line(&merged_head));
            result.extend(feed_all(&mut buffer, tail));

            assert_eq!(
                result,
                vec![ManagementMessage::ClientList(expected_dump())],
                "split at line {split}"
            );
        }
    }

    #[test]
    fn test_notice_inside_partial_dump_is_delivered() {
        let mut buffer = FrameBuffer::new();
        let (head, tail) = CLIENT_LIST_LINES.split_at(4);

        assert!(feed_all(&mut buffer, head).is_empty());
        assert_eq!(
            messages(buffer.push_line(">INFO:interleaved")),
            vec![ManagementMessage::Info("interleaved".to_string())]
        );
        assert_eq!(
            feed_all(&mut buffer, tail),
            vec![ManagementMessage::ClientList(expected_dump())]
        );
    }

    #[test]
    fn test_leading_garbage_is_skipped() {
        let mut buffer = FrameBuffer::new();
        assert!(buffer.push_line("garbage before the dump").is_empty());

        let frames: Vec<Frame> = CLIENT_LIST_LINES
            .iter()
            .flat_map(|line| buffer.push_line(line))
            .collect();

        assert_eq!(
            frames,
            vec![Frame::Message {
                message: ManagementMessage::ClientList(expected_dump()),
                skipped: Some("garbage before the dump".to_string()),
            }]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_single_lines_bypass_buffer() {
        let mut buffer = FrameBuffer::new();
        let result = feed_all(
            &mut buffer,
            &[">HOLD:Waiting for hold release", ">CLIENT:ENV,END"],
        );

        assert_eq!(
            result,
            vec![
                ManagementMessage::Hold("Waiting for hold release".to_string()),
                ManagementMessage::ClientEnvEnd,
            ]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_merged_dump_tail_followed_by_notice() {
        let mut buffer = FrameBuffer::new();
        let (head, _) = CLIENT_LIST_LINES.split_at(8);

        assert!(feed_all(&mut buffer, head).is_empty());
        let result = messages(buffer.push_line("Max bcast/mcast queue length,0\nEND\n>INFO:after"));

        assert_eq!(
            result,
            vec![
                ManagementMessage::ClientList(expected_dump()),
                ManagementMessage::Info("after".to_string()),
            ]
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_overflow_discards_pending() {
        let mut buffer = FrameBuffer::new();
        let junk = "x".repeat(MAX_PENDING_BYTES / 2);

        assert!(buffer.push_line(&junk).is_empty());
        let frames = buffer.push_line(&junk);

        assert!(matches!(
            frames.as_slice(),
            [Frame::Overflow { discarded }] if *discarded > MAX_PENDING_BYTES
        ));
        assert!(buffer.is_empty());
    }
}
