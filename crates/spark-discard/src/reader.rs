//! 读缓冲区与读结果分类。

use std::io::{self, Write};

use spark_flow::{FlowError, FlowScope};

use crate::error::ServerError;

/// 每个会话一次性分配、反复覆盖使用的定长读缓冲区。
///
/// # 契约（What）
/// - `filled() <= capacity()`；
/// - 每次成功读取都会覆盖而不是追加；读取失败时内容与 `filled` 保持不变。
#[derive(Debug)]
pub struct ReadBuffer {
    data: Box<[u8]>,
    filled: usize,
}

impl ReadBuffer {
    /// 默认容量。
    pub const DEFAULT_CAPACITY: usize = 128;

    /// 分配指定容量的缓冲区，分配失败返回 [`ServerError::Allocation`]。
    pub fn with_capacity(capacity: usize) -> Result<Self, ServerError> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|source| ServerError::Allocation { capacity, source })?;
        data.resize(capacity, 0);
        Ok(Self {
            data: data.into_boxed_slice(),
            filled: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// 最近一次成功读取的内容。
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.filled]
    }

    /// 从 Flow 执行一次有界读取。
    pub fn fill_from(&mut self, scope: &mut dyn FlowScope) -> Result<usize, FlowError> {
        let n = scope.read(&mut self.data)?;
        self.filled = n.min(self.data.len());
        Ok(self.filled)
    }

    /// 把已读内容原样写入 `sink`，末尾追加换行。
    pub fn dump(&self, sink: &mut dyn Write) -> io::Result<()> {
        sink.write_all(self.filled())?;
        sink.write_all(b"\n")?;
        sink.flush()
    }
}

/// 一次读取结果的分类。
#[derive(Debug)]
pub enum ReadDisposition {
    /// 读到 `n > 0` 字节。
    Data(usize),
    /// 零长度读取：对端有序关闭。
    PeerClosed,
    /// 暂无数据，等待下一次通知。
    WouldBlock,
    /// 其他错误，按致命错误处理。
    Fatal(FlowError),
}

impl ReadDisposition {
    pub fn classify(result: Result<usize, FlowError>) -> Self {
        match result {
            Ok(0) => Self::PeerClosed,
            Ok(n) => Self::Data(n),
            Err(error) if error.is_would_block() => Self::WouldBlock,
            Err(error) => Self::Fatal(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spark_flow::{ErrorCode, FlowId, FlowInfo, OperationSet, error::READ};
    use std::collections::VecDeque;

    struct Script(VecDeque<Result<Vec<u8>, ErrorCode>>);

    impl FlowScope for Script {
        fn flow(&self) -> FlowId {
            FlowId::new(1)
        }

        fn info(&self) -> Option<&FlowInfo> {
            None
        }

        fn operations(&self) -> OperationSet {
            OperationSet::READABLE
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize, FlowError> {
            match self.0.pop_front() {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(code)) => Err(FlowError::from_kind(code, READ)),
                None => Ok(0),
            }
        }

        fn set_operations(&mut self, _operations: OperationSet) -> Result<(), FlowError> {
            Ok(())
        }

        fn release_flow(&mut self) {}

        fn stop(&mut self) {}
    }

    #[test]
    fn reads_overwrite_instead_of_accumulating() {
        let mut buffer = ReadBuffer::with_capacity(8).unwrap();
        let mut scope = Script(VecDeque::from([Ok(b"abcdefgh".to_vec()), Ok(b"xy".to_vec())]));
        assert_eq!(buffer.fill_from(&mut scope).unwrap(), 8);
        assert_eq!(buffer.filled(), b"abcdefgh");
        assert_eq!(buffer.fill_from(&mut scope).unwrap(), 2);
        assert_eq!(buffer.filled(), b"xy");
    }

    #[test]
    fn failed_read_leaves_buffer_untouched() {
        let mut buffer = ReadBuffer::with_capacity(4).unwrap();
        let mut scope = Script(VecDeque::from([
            Ok(b"ab".to_vec()),
            Err(ErrorCode::WouldBlock),
        ]));
        buffer.fill_from(&mut scope).unwrap();
        let result = buffer.fill_from(&mut scope);
        assert!(matches!(
            ReadDisposition::classify(result),
            ReadDisposition::WouldBlock
        ));
        assert_eq!(buffer.filled(), b"ab");
    }

    #[test]
    fn classification_table() {
        assert!(matches!(ReadDisposition::classify(Ok(0)), ReadDisposition::PeerClosed));
        assert!(matches!(ReadDisposition::classify(Ok(5)), ReadDisposition::Data(5)));
        let fatal = ReadDisposition::classify(Err(FlowError::from_kind(ErrorCode::Io, READ)));
        assert!(matches!(fatal, ReadDisposition::Fatal(error) if error.code() == ErrorCode::Io));
    }

    #[test]
    fn dump_appends_newline() {
        let mut buffer = ReadBuffer::with_capacity(4).unwrap();
        let mut scope = Script(VecDeque::from([Ok(b"hi".to_vec())]));
        buffer.fill_from(&mut scope).unwrap();
        let mut sink = Vec::new();
        buffer.dump(&mut sink).unwrap();
        assert_eq!(sink, b"hi\n");
    }

    #[test]
    fn capacity_is_fixed() {
        let buffer = ReadBuffer::with_capacity(ReadBuffer::DEFAULT_CAPACITY).unwrap();
        assert_eq!(buffer.capacity(), 128);
        assert!(buffer.filled().is_empty());
    }
}
