//! The command server's wire format: a closed variant over the recognized
//! verbs instead of a string-keyed dispatch table.

use crate::error::DomeError;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Position,
    PulsePosition,
    DomeBusy,
    Goto(GotoArgument),
    Calibrate,
    Left,
    Right,
    Stop,
    UpdateConfig,
    Track,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GotoArgument {
    Absolute(f64),
    Relative(f64),
}

/// A response is exactly two lines: `"<code>\n<message>\n"`.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub code: i64,
    pub message: String,
}

impl Response {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Response {
            code,
            message: message.into(),
        }
    }

    pub fn render(&self) -> String {
        format!("{}\n{}\n", self.code, self.message)
    }
}

/// Parses one request line into a `Command`, or the `BadCommand`/
/// `BadArgument` error the server turns straight into a response.
pub fn parse_command(request: &str) -> Result<Command, DomeError> {
    let mut tokens = request.split_whitespace();
    let verb = tokens.next().ok_or(DomeError::BadCommand)?;
    match verb.to_ascii_uppercase().as_str() {
        "POSITION" => Ok(Command::Position),
        "PULSEPOSITION" => Ok(Command::PulsePosition),
        "DOMEBUSY" => Ok(Command::DomeBusy),
        "CALIBRATE" => Ok(Command::Calibrate),
        "LEFT" => Ok(Command::Left),
        "RIGHT" => Ok(Command::Right),
        "STOP" => Ok(Command::Stop),
        "UPDATECONFIG" => Ok(Command::UpdateConfig),
        "TRACK" => Ok(Command::Track),
        "GOTO" => {
            let arg = tokens
                .next()
                .ok_or_else(|| DomeError::BadArgument("".to_string()))?;
            let degrees: f64 = arg
                .parse()
                .map_err(|_| DomeError::BadArgument(arg.to_string()))?;
            if arg.starts_with('+') || arg.starts_with('-') {
                Ok(Command::Goto(GotoArgument::Relative(degrees)))
            } else {
                Ok(Command::Goto(GotoArgument::Absolute(degrees)))
            }
        }
        _ => Err(DomeError::BadCommand),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_verbs_case_insensitively() {
        assert_eq!(parse_command("position").unwrap(), Command::Position);
        assert_eq!(parse_command("PoSiTiOn").unwrap(), Command::Position);
    }

    #[test]
    fn parses_absolute_goto() {
        assert_eq!(
            parse_command("GOTO 90").unwrap(),
            Command::Goto(GotoArgument::Absolute(90.0))
        );
    }

    #[test]
    fn parses_relative_goto_with_sign() {
        assert_eq!(
            parse_command("GOTO -5").unwrap(),
            Command::Goto(GotoArgument::Relative(-5.0))
        );
        assert_eq!(
            parse_command("GOTO +5").unwrap(),
            Command::Goto(GotoArgument::Relative(5.0))
        );
    }

    #[test]
    fn rejects_malformed_goto_argument() {
        assert!(matches!(
            parse_command("GOTO nope"),
            Err(DomeError::BadArgument(_))
        ));
    }

    #[test]
    fn rejects_unknown_verb() {
        assert!(matches!(parse_command("FLY"), Err(DomeError::BadCommand)));
    }

    #[test]
    fn rejects_empty_request() {
        assert!(matches!(parse_command(""), Err(DomeError::BadCommand)));
    }

    #[test]
    fn response_renders_as_two_lines() {
        let response = Response::new(1, "Moving dome to left.");
        assert_eq!(response.render(), "1\nMoving dome to left.\n");
    }
}
