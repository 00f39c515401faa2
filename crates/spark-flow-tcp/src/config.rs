use spark_flow::CapabilityMask;

/// `TcpContext` 的构造参数。
///
/// # 契约（What）
/// - `backlog`：监听队列长度，默认 128；
/// - `defaults`：新 Flow 的默认需求位图，默认为空（不附加任何约束）。
#[derive(Clone, Copy, Debug)]
pub struct TcpContextConfig {
    backlog: i32,
    defaults: CapabilityMask,
}

impl TcpContextConfig {
    /// 默认监听队列长度。
    pub const DEFAULT_BACKLOG: i32 = 128;

    /// 使用默认值构造。
    pub const fn new() -> Self {
        Self {
            backlog: Self::DEFAULT_BACKLOG,
            defaults: CapabilityMask::empty(),
        }
    }

    /// 设置监听队列长度，非正值按 1 处理。
    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog.max(1);
        self
    }

    /// 设置新 Flow 的默认需求位图。
    pub fn with_defaults(mut self, defaults: CapabilityMask) -> Self {
        self.defaults = defaults;
        self
    }

    /// 监听队列长度。
    pub fn backlog(&self) -> i32 {
        self.backlog
    }

    /// 新 Flow 的默认需求位图。
    pub fn defaults(&self) -> CapabilityMask {
        self.defaults
    }
}

impl Default for TcpContextConfig {
    fn default() -> Self {
        Self::new()
    }
}
