//! 命令行配置。
//!
//! # 教案式说明
//! - **意图（Why）**：所有输入（能力请求串、缓冲区大小、详细级别、监听端点）都在创建任何
//!   传输资源之前完成校验；校验失败只需打印用法并退出。
//! - **逻辑（How）**：`clap` 派生解析原始参数并完成数值范围校验，随后由
//!   [`ServerConfig::from_args`] 解析能力请求串，生成不可变的 [`ServerConfig`]；
//!   命令行上显式给出的 `-P/-S/-v` 会被记为回显行，安装日志后输出。
//! - **契约（What）**：`-S` 取值 `>= 1`，`-v` 取值 `0..=2`；未知选项与多余的位置参数
//!   都返回 [`ConfigError::Arguments`]。

use std::ffi::OsString;

use clap::{CommandFactory, FromArgMatches, Parser, ValueEnum, parser::ValueSource};
use spark_flow::AcceptEndpoint;
use tracing::info;

use crate::{
    capability::{CapabilityRequest, DEFAULT_CAPABILITIES},
    error::ConfigError,
    reader::ReadBuffer,
};

/// 默认监听端口。
pub const DEFAULT_PORT: u16 = 8080;

/// 日志详细级别。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Verbosity(u8);

impl Verbosity {
    /// 最高级别。
    pub const MAX: u8 = 2;

    /// 构造级别，超过上限时截断。
    pub const fn new(level: u8) -> Self {
        if level > Self::MAX {
            Self(Self::MAX)
        } else {
            Self(level)
        }
    }

    pub const fn level(self) -> u8 {
        self.0
    }

    /// 是否把收到的原始数据转储到输出。
    pub const fn dumps_payload(self) -> bool {
        self.0 >= 2
    }
}

impl Default for Verbosity {
    fn default() -> Self {
        Self(1)
    }
}

/// 一次会话结束后的行为。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum AcceptMode {
    /// 服务一个 Flow 后退出。
    #[default]
    #[value(help = "Serve one flow, then exit")]
    Single,
    /// 每个 Flow 结束后立即接受下一个。
    #[value(help = "Accept a new flow after each one closes")]
    Continuous,
}

/// 原始命令行参数。
#[derive(Debug, Parser)]
#[command(
    name = "server_discard",
    about = "Accept one transport flow and discard everything it sends",
    long_about = None,
    disable_version_flag = true
)]
pub struct ServerArgs {
    /// 能力请求串，以 `,` 或 `;` 分隔。
    #[arg(
        short = 'P',
        long = "properties",
        default_value = DEFAULT_CAPABILITIES,
        help = "Transport properties to request, separated by ',' or ';'"
    )]
    pub properties: String,

    /// 读缓冲区大小（字节），至少为 1：零容量的读取结果与对端关闭无法区分。
    #[arg(
        short = 'S',
        long = "buffer-size",
        default_value_t = ReadBuffer::DEFAULT_CAPACITY as u32,
        value_parser = clap::value_parser!(u32).range(1..),
        help = "Size of the read buffer in bytes"
    )]
    pub buffer_size: u32,

    /// 日志级别 0..2。
    #[arg(
        short = 'v',
        long = "verbosity",
        default_value_t = 1,
        value_parser = clap::value_parser!(u8).range(0..=2),
        help = "Log level: 0 warnings only, 1 operational, 2 trace and payload dump"
    )]
    pub verbosity: u8,

    /// 监听主机，`*` 表示所有地址。
    #[arg(
        long,
        default_value = AcceptEndpoint::WILDCARD,
        help = "Host to accept on, '*' for every local address"
    )]
    pub bind: String,

    /// 监听端口。
    #[arg(long, default_value_t = DEFAULT_PORT, help = "Port to accept on")]
    pub port: u16,

    /// 一个 Flow 结束后是否继续接受。
    #[arg(
        long,
        value_enum,
        default_value_t = AcceptMode::Single,
        help = "Whether to accept again after a flow closes"
    )]
    pub accept_mode: AcceptMode,
}

/// 校验后的服务端配置。
#[derive(Clone, Debug)]
pub struct ServerConfig {
    capabilities: CapabilityRequest,
    buffer_size: usize,
    verbosity: Verbosity,
    endpoint: AcceptEndpoint,
    accept_mode: AcceptMode,
    echo: Vec<String>,
}

impl ServerConfig {
    /// 从进程参数解析，第一个元素为程序名。
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = ServerArgs::command().try_get_matches_from(args)?;
        let args = ServerArgs::from_arg_matches(&matches)?;
        let explicit = |id: &str| matches.value_source(id) == Some(ValueSource::CommandLine);

        let mut echo = Vec::new();
        if explicit("properties") {
            echo.push(format!("option - properties: {}", args.properties));
        }
        if explicit("buffer_size") {
            echo.push(format!("option - buffer size: {}", args.buffer_size));
        }
        if explicit("verbosity") {
            echo.push(format!("option - log level: {}", args.verbosity));
        }

        let mut config = Self::from_args(args)?;
        config.echo = echo;
        Ok(config)
    }

    /// 从已解析的参数构造，校验能力请求串。
    pub fn from_args(args: ServerArgs) -> Result<Self, ConfigError> {
        Ok(Self {
            capabilities: CapabilityRequest::parse(&args.properties)?,
            buffer_size: args.buffer_size as usize,
            verbosity: Verbosity::new(args.verbosity),
            endpoint: AcceptEndpoint::new(args.bind, args.port),
            accept_mode: args.accept_mode,
            echo: Vec::new(),
        })
    }

    /// 用法说明，包含各选项的当前默认值。
    pub fn usage() -> String {
        ServerArgs::command().render_help().to_string()
    }

    pub fn with_accept_mode(mut self, accept_mode: AcceptMode) -> Self {
        self.accept_mode = accept_mode;
        self
    }

    pub fn capabilities(&self) -> &CapabilityRequest {
        &self.capabilities
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn endpoint(&self) -> &AcceptEndpoint {
        &self.endpoint
    }

    pub fn accept_mode(&self) -> AcceptMode {
        self.accept_mode
    }

    /// 命令行上显式给出的选项回显行。
    pub fn echo_lines(&self) -> &[String] {
        &self.echo
    }

    /// 以 `info` 级别输出选项回显。
    pub fn log_options(&self) {
        for line in &self.echo {
            info!("{line}");
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            capabilities: CapabilityRequest::default(),
            buffer_size: ReadBuffer::DEFAULT_CAPACITY,
            verbosity: Verbosity::default(),
            endpoint: AcceptEndpoint::wildcard(DEFAULT_PORT),
            accept_mode: AcceptMode::Single,
            echo: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityParseError;
    use spark_flow::Capability;

    #[test]
    fn defaults_match_the_classic_sample() {
        let config = ServerConfig::try_parse_from(["server_discard"]).unwrap();
        assert_eq!(config.buffer_size(), 128);
        assert_eq!(config.verbosity(), Verbosity::new(1));
        assert_eq!(config.endpoint(), &AcceptEndpoint::wildcard(8080));
        assert_eq!(config.accept_mode(), AcceptMode::Single);
        assert_eq!(config.capabilities(), &CapabilityRequest::default());
        assert!(config.echo_lines().is_empty());
    }

    #[test]
    fn explicit_options_are_echoed() {
        let config = ServerConfig::try_parse_from([
            "server_discard",
            "-P",
            "NEAT_PROPERTY_SCTP_BANNED",
            "-S",
            "8",
            "-v",
            "2",
        ])
        .unwrap();
        assert_eq!(
            config.echo_lines(),
            [
                "option - properties: NEAT_PROPERTY_SCTP_BANNED",
                "option - buffer size: 8",
                "option - log level: 2",
            ]
        );
        assert_eq!(config.buffer_size(), 8);
        assert!(config.verbosity().dumps_payload());
        assert!(config.capabilities().mask().contains(Capability::SCTP_BANNED));
    }

    #[test]
    fn unknown_property_is_a_config_error() {
        let error = ServerConfig::try_parse_from(["server_discard", "-P", "BOGUS_TOKEN"])
            .unwrap_err();
        assert!(matches!(
            error,
            ConfigError::Capability(CapabilityParseError::UnknownToken { ref token, position: 0 })
                if token == "BOGUS_TOKEN"
        ));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(ServerConfig::try_parse_from(["server_discard", "-S", "0"]).is_err());
        assert!(ServerConfig::try_parse_from(["server_discard", "-v", "3"]).is_err());
    }

    #[test]
    fn stray_positionals_and_unknown_flags_are_rejected() {
        assert!(matches!(
            ServerConfig::try_parse_from(["server_discard", "extra"]),
            Err(ConfigError::Arguments(_))
        ));
        assert!(matches!(
            ServerConfig::try_parse_from(["server_discard", "-x"]),
            Err(ConfigError::Arguments(_))
        ));
    }

    #[test]
    fn large_buffers_are_accepted() {
        let config = ServerConfig::try_parse_from(["server_discard", "-S", "1048576"]).unwrap();
        assert_eq!(config.buffer_size(), 1 << 20);
    }

    #[test]
    fn usage_is_plain_english() {
        let usage = ServerConfig::usage();
        assert!(usage.is_ascii(), "{usage}");
        let long = ServerArgs::command().render_long_help().to_string();
        assert!(long.is_ascii(), "{long}");
        assert!(usage.contains("Size of the read buffer in bytes"));
    }

    #[test]
    fn help_is_informational() {
        let error = ServerConfig::try_parse_from(["server_discard", "--help"]).unwrap_err();
        assert!(error.is_informational());
    }

    #[test]
    fn usage_shows_defaults() {
        let usage = ServerConfig::usage();
        assert!(usage.contains(DEFAULT_CAPABILITIES));
        assert!(usage.contains("[default: 128]"));
        assert!(usage.contains("[default: 1]"));
    }

    #[test]
    fn supplemented_options() {
        let config = ServerConfig::try_parse_from([
            "server_discard",
            "--bind",
            "127.0.0.1",
            "--port",
            "0",
            "--accept-mode",
            "continuous",
        ])
        .unwrap();
        assert_eq!(config.endpoint(), &AcceptEndpoint::new("127.0.0.1", 0));
        assert_eq!(config.accept_mode(), AcceptMode::Continuous);
    }
}
