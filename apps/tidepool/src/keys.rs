/// Ctrl-]
pub const PREFIX_KEY: u8 = 0x1d;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixCommand {
    Detach,
    Next,
    Previous,
    Create,
    CloseCurrent,
    Clear,
}

impl PrefixCommand {
    fn from_key(key: u8) -> Option<Self> {
        match key {
            b'd' => Some(Self::Detach),
            b'n' => Some(Self::Next),
            b'p' => Some(Self::Previous),
            b'c' => Some(Self::Create),
            b'x' => Some(Self::CloseCurrent),
            b'l' => Some(Self::Clear),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    Input(Vec<u8>),
    Command(PrefixCommand),
}

/// Splits raw stdin bytes into session input and prefix commands. The
/// prefix state survives across reads, so a prefix at the end of one read
/// applies to the first byte of the next.
#[derive(Debug, Default)]
pub struct PrefixDecoder {
    armed: bool,
}

impl PrefixDecoder {
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<KeyAction> {
        let mut actions = Vec::new();
        let mut input = Vec::new();
        for &byte in bytes {
            if !self.armed {
                if byte == PREFIX_KEY {
                    self.armed = true;
                } else {
                    input.push(byte);
                }
                continue;
            }
            self.armed = false;
            if byte == PREFIX_KEY {
                input.push(PREFIX_KEY);
            } else if let Some(command) = PrefixCommand::from_key(byte) {
                if !input.is_empty() {
                    actions.push(KeyAction::Input(std::mem::take(&mut input)));
                }
                actions.push(KeyAction::Command(command));
            } else {
                // Not a command: the prefix and the key both go to the shell.
                input.extend_from_slice(&[PREFIX_KEY, byte]);
            }
        }
        if !input.is_empty() {
            actions.push(KeyAction::Input(input));
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn plain_bytes_pass_through() {
        let mut keys = PrefixDecoder::default();
        assert_eq!(keys.feed(b"ls -la\r"), vec![KeyAction::Input(b"ls -la\r".to_vec())]);
    }

    #[test_timeout::timeout]
    fn commands_split_surrounding_input() {
        let mut keys = PrefixDecoder::default();
        assert_eq!(
            keys.feed(b"ab\x1dncd"),
            vec![
                KeyAction::Input(b"ab".to_vec()),
                KeyAction::Command(PrefixCommand::Next),
                KeyAction::Input(b"cd".to_vec()),
            ]
        );
    }

    #[test_timeout::timeout]
    fn double_prefix_sends_a_literal_prefix() {
        let mut keys = PrefixDecoder::default();
        assert_eq!(keys.feed(b"\x1d\x1d"), vec![KeyAction::Input(vec![PREFIX_KEY])]);
    }

    #[test_timeout::timeout]
    fn prefix_carries_across_reads() {
        let mut keys = PrefixDecoder::default();
        assert!(keys.feed(b"\x1d").is_empty());
        assert_eq!(keys.feed(b"d"), vec![KeyAction::Command(PrefixCommand::Detach)]);
    }

    #[test_timeout::timeout]
    fn unknown_command_keys_are_forwarded_with_the_prefix() {
        let mut keys = PrefixDecoder::default();
        assert_eq!(keys.feed(b"\x1dzq"), vec![KeyAction::Input(b"\x1dzq".to_vec())]);
        assert!(keys.feed(b"\x1d").is_empty());
        assert_eq!(keys.feed(b"\r"), vec![KeyAction::Input(b"\x1d\r".to_vec())]);
    }
}
