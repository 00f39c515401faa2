//! Flow 契约的错误语义。
//!
//! # 教案式说明
//! - **意图（Why）**：库以整数错误码描述失败，其中 `WouldBlock` 并非真正的错误，而是
//!   “暂无数据、等待下一次通知”的信号；调用方需要在不丢失原始 IO 错误的前提下区分它。
//! - **逻辑（How）**：[`FlowError`] 记录错误码、失败的操作名称与可读描述，并可选携带
//!   `io::Error` 作为 `source`；操作名称来自 [`OperationKind`] 常量，保证日志中稳定可检索。
//! - **契约（What）**：[`ErrorCode::as_raw`] 返回库定义的数值，诊断输出应使用该数值。

use std::{borrow::Cow, fmt, io};

use thiserror::Error;

/// 库定义的错误码。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCode {
    /// 非阻塞操作暂时无法完成。
    WouldBlock,
    /// 参数非法或与当前状态不符。
    BadArgument,
    /// 底层 IO 失败。
    Io,
    /// 名称解析失败。
    Dns,
    /// 实现内部错误。
    Internal,
    /// 安全层协商失败或不可用。
    Security,
    /// 无法满足请求（例如没有可用的传输协议）。
    Unable,
    /// 消息超过上限。
    MessageTooBig,
    /// 对端异常（复位、中止等）。
    Remote,
    /// 内存不足。
    OutOfMemory,
}

impl ErrorCode {
    /// 返回库定义的数值。
    pub const fn as_raw(self) -> i32 {
        match self {
            Self::WouldBlock => 1,
            Self::BadArgument => 2,
            Self::Io => 3,
            Self::Dns => 4,
            Self::Internal => 5,
            Self::Security => 6,
            Self::Unable => 7,
            Self::MessageTooBig => 8,
            Self::Remote => 9,
            Self::OutOfMemory => 10,
        }
    }

    /// 稳定的蛇形名称，用于日志字段。
    pub const fn name(self) -> &'static str {
        match self {
            Self::WouldBlock => "would_block",
            Self::BadArgument => "bad_argument",
            Self::Io => "io",
            Self::Dns => "dns",
            Self::Internal => "internal",
            Self::Security => "security",
            Self::Unable => "unable",
            Self::MessageTooBig => "message_too_big",
            Self::Remote => "remote",
            Self::OutOfMemory => "out_of_memory",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name(), self.as_raw())
    }
}

/// 描述一次契约操作的稳定名称与默认文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    pub name: &'static str,
    pub message: &'static str,
}

pub const INIT_CONTEXT: OperationKind = OperationKind {
    name: "init_ctx",
    message: "context initialisation",
};
pub const NEW_FLOW: OperationKind = OperationKind {
    name: "new_flow",
    message: "flow creation",
};
pub const GET_PROPERTY: OperationKind = OperationKind {
    name: "get_property",
    message: "requirement query",
};
pub const SET_PROPERTY: OperationKind = OperationKind {
    name: "set_property",
    message: "requirement update",
};
pub const SET_OPERATIONS: OperationKind = OperationKind {
    name: "set_operations",
    message: "callback installation",
};
pub const ACCEPT: OperationKind = OperationKind {
    name: "accept",
    message: "passive accept",
};
pub const READ: OperationKind = OperationKind {
    name: "read",
    message: "non-blocking read",
};
pub const RUN: OperationKind = OperationKind {
    name: "start_event_loop",
    message: "event loop",
};

/// Flow 契约统一的错误类型。
///
/// # 契约（What）
/// - `code`：库定义的错误码，`WouldBlock` 表示“稍后重试”；
/// - `operation`：失败操作的稳定名称，取自 [`OperationKind::name`]；
/// - `source`：可选的底层 IO 错误。
#[derive(Debug, Error)]
#[error("{operation} failed ({code}): {message}")]
pub struct FlowError {
    code: ErrorCode,
    operation: &'static str,
    message: Cow<'static, str>,
    #[source]
    source: Option<io::Error>,
}

impl FlowError {
    /// 以错误码、操作与描述构造错误。
    pub fn new(
        code: ErrorCode,
        operation: OperationKind,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code,
            operation: operation.name,
            message: message.into(),
            source: None,
        }
    }

    /// 使用操作的默认文案构造错误。
    pub fn from_kind(code: ErrorCode, operation: OperationKind) -> Self {
        Self::new(code, operation, operation.message)
    }

    /// 构造“暂无数据”信号。
    pub fn would_block(operation: OperationKind) -> Self {
        Self::new(
            ErrorCode::WouldBlock,
            operation,
            format!("{} would block", operation.message),
        )
    }

    /// 附加底层 IO 错误。
    pub fn with_source(mut self, source: io::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// 错误码。
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// 失败操作的稳定名称。
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// 可读描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 是否为“暂无数据”信号。
    pub fn is_would_block(&self) -> bool {
        self.code == ErrorCode::WouldBlock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn raw_codes_match_library_values() {
        assert_eq!(ErrorCode::WouldBlock.as_raw(), 1);
        assert_eq!(ErrorCode::Io.as_raw(), 3);
        assert_eq!(ErrorCode::OutOfMemory.as_raw(), 10);
    }

    #[test]
    fn display_names_operation_and_code() {
        let error = FlowError::from_kind(ErrorCode::Unable, ACCEPT);
        assert_eq!(error.to_string(), "accept failed (unable=7): passive accept");
    }

    #[test]
    fn io_source_is_preserved() {
        let error = FlowError::from_kind(ErrorCode::Io, READ)
            .with_source(io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(error.source().is_some());
        assert!(!error.is_would_block());
        assert!(FlowError::would_block(READ).is_would_block());
    }
}
