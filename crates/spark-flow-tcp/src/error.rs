use std::io;

use spark_flow::{ErrorCode, FlowError, OperationKind};

/// 监听套接字的创建、选项设置与绑定。
pub(crate) const BIND: OperationKind = OperationKind {
    name: "accept.bind",
    message: "tcp bind",
};

/// 查询已建立连接的地址。
pub(crate) const PEER: OperationKind = OperationKind {
    name: "accept.peer",
    message: "tcp address query",
};

/// 将 IO 错误映射为 [`FlowError`]，并保留原始错误作为 `source`。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> FlowError {
    let code = categorize_io_error(&error);
    FlowError::new(code, kind, format!("{}: {}", kind.message, error)).with_source(error)
}

fn categorize_io_error(error: &io::Error) -> ErrorCode {
    use io::ErrorKind;
    match error.kind() {
        ErrorKind::WouldBlock => ErrorCode::WouldBlock,
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe => ErrorCode::Remote,
        ErrorKind::AddrInUse | ErrorKind::AddrNotAvailable | ErrorKind::PermissionDenied => {
            ErrorCode::Unable
        }
        ErrorKind::OutOfMemory => ErrorCode::OutOfMemory,
        ErrorKind::InvalidInput => ErrorCode::BadArgument,
        _ => ErrorCode::Io,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn reset_maps_to_remote_and_keeps_source() {
        let error = map_io_error(
            spark_flow::error::READ,
            io::Error::from(io::ErrorKind::ConnectionReset),
        );
        assert_eq!(error.code(), ErrorCode::Remote);
        assert_eq!(error.operation(), "read");
        assert!(error.source().is_some());
    }

    #[test]
    fn address_in_use_is_unable() {
        let error = map_io_error(BIND, io::Error::from(io::ErrorKind::AddrInUse));
        assert_eq!(error.code(), ErrorCode::Unable);
        assert!(error.message().starts_with("tcp bind"));
    }

    #[test]
    fn would_block_is_preserved() {
        let error = map_io_error(
            spark_flow::error::READ,
            io::Error::from(io::ErrorKind::WouldBlock),
        );
        assert!(error.is_would_block());
    }
}
