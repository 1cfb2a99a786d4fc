//! Splits a CRLF-framed control line into an upper-cased verb and its
//! (unmodified, case-preserved) argument.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub verb: String,
    pub arg: Option<String>,
}

pub fn parse(line: &str) -> Command {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    match trimmed.split_once(' ') {
        Some((verb, arg)) => Command {
            verb: verb.to_uppercase(),
            arg: Some(arg.trim().to_string()),
        },
        None => Command {
            verb: trimmed.to_uppercase(),
            arg: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_verb_and_argument() {
        let cmd = parse("user anonymous\r\n");
        assert_eq!(cmd.verb, "USER");
        assert_eq!(cmd.arg.as_deref(), Some("anonymous"));
    }

    #[test]
    fn verb_only_has_no_arg() {
        let cmd = parse("PWD\r\n");
        assert_eq!(cmd.verb, "PWD");
        assert_eq!(cmd.arg, None);
    }

    #[test]
    fn preserves_argument_case() {
        let cmd = parse("CWD MixedCase/Dir\r\n");
        assert_eq!(cmd.arg.as_deref(), Some("MixedCase/Dir"));
    }
}
