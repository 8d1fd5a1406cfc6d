//! Client commands.

use super::commands::*;
use super::response::ResponseKind;

/// A command from the client, decoded as far as the proxy needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Quit,
    Query(String),
    InitDb(String),
    Ping,
    Statistics,
    FieldList,
    SetOption,
    ResetConnection,
    StmtPrepare(String),
    StmtExecute { statement_id: u32 },
    StmtSendLongData { statement_id: u32 },
    StmtClose { statement_id: u32 },
    StmtReset { statement_id: u32 },
    StmtFetch { statement_id: u32 },
    /// Query, prepare or init-db text that is not valid UTF-8, rendered
    /// lossily for the audit record. Never forwarded.
    InvalidText { code: u8, text: String },
    /// Anything else. Never forwarded.
    Unsupported(u8),
}

impl ClientCommand {
    pub fn parse(payload: &[u8]) -> Self {
        let Some((&code, body)) = payload.split_first() else {
            return Self::Unsupported(0);
        };
        let text = |wrap: fn(String) -> Self| match std::str::from_utf8(body) {
            Ok(text) => wrap(text.to_string()),
            Err(_) => Self::InvalidText {
                code,
                text: String::from_utf8_lossy(body).into_owned(),
            },
        };
        let statement_id = || {
            body.get(..4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        };

        match code {
            COM_QUIT => Self::Quit,
            COM_QUERY => text(Self::Query),
            COM_INIT_DB => text(Self::InitDb),
            COM_PING => Self::Ping,
            COM_STATISTICS => Self::Statistics,
            COM_FIELD_LIST => Self::FieldList,
            COM_SET_OPTION => Self::SetOption,
            COM_RESET_CONNECTION => Self::ResetConnection,
            COM_STMT_PREPARE => text(Self::StmtPrepare),
            COM_STMT_EXECUTE | COM_STMT_SEND_LONG_DATA | COM_STMT_CLOSE | COM_STMT_RESET
            | COM_STMT_FETCH => match statement_id() {
                Some(statement_id) => match code {
                    COM_STMT_EXECUTE => Self::StmtExecute { statement_id },
                    COM_STMT_SEND_LONG_DATA => Self::StmtSendLongData { statement_id },
                    COM_STMT_CLOSE => Self::StmtClose { statement_id },
                    COM_STMT_RESET => Self::StmtReset { statement_id },
                    _ => Self::StmtFetch { statement_id },
                },
                None => Self::Unsupported(code),
            },
            other => Self::Unsupported(other),
        }
    }

    /// Response shape, or `None` for commands the server never answers.
    pub fn response_kind(&self) -> Option<ResponseKind> {
        match self {
            Self::Query(_) => Some(ResponseKind::Query),
            Self::StmtPrepare(_) => Some(ResponseKind::Prepare),
            Self::StmtExecute { .. } => Some(ResponseKind::Execute),
            Self::StmtFetch { .. } => Some(ResponseKind::Fetch),
            Self::FieldList => Some(ResponseKind::FieldList),
            Self::InitDb(_)
            | Self::Ping
            | Self::Statistics
            | Self::SetOption
            | Self::ResetConnection
            | Self::StmtReset { .. } => Some(ResponseKind::Single),
            Self::Quit
            | Self::StmtSendLongData { .. }
            | Self::StmtClose { .. }
            | Self::InvalidText { .. }
            | Self::Unsupported(_) => None,
        }
    }

    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Quit => "COM_QUIT",
            Self::Query(_) => "COM_QUERY",
            Self::InitDb(_) => "COM_INIT_DB",
            Self::Ping => "COM_PING",
            Self::Statistics => "COM_STATISTICS",
            Self::FieldList => "COM_FIELD_LIST",
            Self::SetOption => "COM_SET_OPTION",
            Self::ResetConnection => "COM_RESET_CONNECTION",
            Self::StmtPrepare(_) => "COM_STMT_PREPARE",
            Self::StmtExecute { .. } => "COM_STMT_EXECUTE",
            Self::StmtSendLongData { .. } => "COM_STMT_SEND_LONG_DATA",
            Self::StmtClose { .. } => "COM_STMT_CLOSE",
            Self::StmtReset { .. } => "COM_STMT_RESET",
            Self::StmtFetch { .. } => "COM_STMT_FETCH",
            Self::InvalidText { .. } => "invalid_text",
            Self::Unsupported(_) => "unsupported",
        }
    }
}
