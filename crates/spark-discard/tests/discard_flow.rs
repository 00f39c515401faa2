//! 以脚本化上下文驱动完整的启动序列与丢弃状态机。

use std::{
    io::Write,
    sync::{Arc, Mutex},
};

use spark_discard::{AcceptMode, ServerConfig, ServerError, SetupStep, serve};
use spark_flow::{
    AcceptEndpoint, Capability, CapabilityMask, ErrorCode, FlowError, OperationSet,
    error::INIT_CONTEXT,
    mock::{MockCall, MockConnection, MockContext, MockOperation},
};
use tracing_test::traced_test;

#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn config(args: &[&str]) -> ServerConfig {
    let mut argv = vec!["server_discard"];
    argv.extend_from_slice(args);
    ServerConfig::try_parse_from(argv).unwrap()
}

fn discard_sink() -> Box<dyn Write> {
    Box::new(std::io::sink())
}

#[test]
#[traced_test]
fn default_scenario_discards_fifty_bytes_then_closes() {
    let ctx = MockContext::new().connection(MockConnection::tcp_v4().data(vec![b'a'; 50]).close());
    let journal = ctx.journal();

    let report = serve(&config(&[]), || Ok(ctx), discard_sink).unwrap();

    let flow = journal.flows()[0];
    assert_eq!(journal.reads(flow), vec![Ok(50), Ok(0)]);
    assert_eq!(journal.releases(flow), 1);
    assert_eq!(report.sessions.len(), 1);
    assert_eq!(report.sessions[0].bytes, 50);
    assert!(report.sessions[0].peer_closed);

    let expected = CapabilityMask::empty()
        .with(Capability::TCP_REQUIRED)
        .with(Capability::IPV4_REQUIRED);
    let calls = journal.calls();
    assert!(calls.contains(&MockCall::SetRequirements(flow, expected)));
    assert!(calls.contains(&MockCall::Accept(flow, AcceptEndpoint::wildcard(8080))));

    assert!(logs_contain("setting property: NEAT_PROPERTY_TCP_REQUIRED"));
    assert!(logs_contain("connected - TCP over IPv4"));
    assert!(logs_contain("received data - 50 byte"));
    logs_assert(|lines: &[&str]| {
        match lines
            .iter()
            .filter(|line| line.contains("peer disconnected"))
            .count()
        {
            1 => Ok(()),
            n => Err(format!("expected one disconnect line, found {n}")),
        }
    });
}

#[test]
fn baseline_requirements_are_preserved() {
    let baseline = CapabilityMask::from(Capability::OPTIONAL_SECURITY);
    let ctx = MockContext::with_defaults(baseline)
        .connection(MockConnection::tcp_v4().close());
    let journal = ctx.journal();

    serve(&config(&["-P", "NEAT_PROPERTY_SCTP_BANNED"]), || Ok(ctx), discard_sink).unwrap();

    let flow = journal.flows()[0];
    let merged = baseline.with(Capability::SCTP_BANNED);
    assert!(journal.calls().contains(&MockCall::SetRequirements(flow, merged)));
}

#[test]
fn would_block_leaves_slots_untouched() {
    let ctx = MockContext::new().connection(
        MockConnection::tcp_v4()
            .would_block()
            .data(b"hello".to_vec())
            .close(),
    );
    let journal = ctx.journal();

    let report = serve(&config(&[]), || Ok(ctx), discard_sink).unwrap();

    let flow = journal.flows()[0];
    assert_eq!(
        journal.reads(flow),
        vec![Err(ErrorCode::WouldBlock), Ok(5), Ok(0)]
    );
    assert_eq!(
        journal.operations(flow),
        vec![
            OperationSet::CONNECTED.with(OperationSet::ERROR),
            OperationSet::READABLE.with(OperationSet::ERROR),
            OperationSet::empty(),
        ]
    );
    assert_eq!(report.sessions[0].would_blocks, 1);
}

#[test]
#[traced_test]
fn read_filling_the_buffer_is_data_and_reading_continues() {
    let ctx = MockContext::new()
        .connection(MockConnection::tcp_v4().data(b"0123456789a".to_vec()).close());
    let journal = ctx.journal();

    let report = serve(&config(&["-S", "8"]), || Ok(ctx), discard_sink).unwrap();

    let flow = journal.flows()[0];
    assert_eq!(journal.reads(flow), vec![Ok(8), Ok(3), Ok(0)]);
    assert_eq!(report.sessions[0].reads, 2);
    assert!(logs_contain("received data - 8 byte"));
    assert!(logs_contain("received data - 3 byte"));
}

#[test]
fn verbose_mode_dumps_payload_to_the_sink() {
    let sink = SharedSink::default();
    let ctx = MockContext::new()
        .connection(MockConnection::tcp_v4().data(b"ping".to_vec()).data(b"pong".to_vec()).close());
    let sinks = {
        let sink = sink.clone();
        move || Box::new(sink.clone()) as Box<dyn Write>
    };

    serve(&config(&["-v", "2"]), || Ok(ctx), sinks).unwrap();

    assert_eq!(sink.0.lock().unwrap().as_slice(), b"ping\npong\n");
}

#[test]
fn bogus_token_aborts_before_any_transport_call() {
    let ctx = MockContext::new().connection(MockConnection::tcp_v4().close());
    let journal = ctx.journal();

    let result = ServerConfig::try_parse_from(["server_discard", "-P", "BOGUS_TOKEN"])
        .map_err(ServerError::from)
        .and_then(|config| serve(&config, || Ok(ctx), discard_sink));

    let error = result.unwrap_err();
    assert!(matches!(error, ServerError::Config(_)));
    assert_ne!(error.exit_code(), 0);
    assert!(journal.calls().is_empty());
    assert_eq!(journal.accepts(), 0);
}

#[test]
#[traced_test]
fn read_error_is_a_transport_failure_with_single_release() {
    let ctx = MockContext::new().connection(MockConnection::tcp_v4().fail(ErrorCode::Io));
    let journal = ctx.journal();

    let error = serve(&config(&[]), || Ok(ctx), discard_sink).unwrap_err();

    assert!(matches!(&error, ServerError::Transport(source) if source.code() == ErrorCode::Io));
    assert_eq!(error.exit_code(), 1);
    let flow = journal.flows()[0];
    assert_eq!(journal.releases(flow), 1);
    assert!(logs_contain("neat_read error: 3"));
}

#[test]
fn transport_fault_goes_through_the_error_callback() {
    let ctx = MockContext::new()
        .connection(MockConnection::tcp_v4().data(b"x".to_vec()).fault(ErrorCode::Remote));
    let journal = ctx.journal();

    let error = serve(&config(&[]), || Ok(ctx), discard_sink).unwrap_err();

    assert_eq!(error.flow_error().map(FlowError::code), Some(ErrorCode::Remote));
    assert_eq!(journal.releases(journal.flows()[0]), 1);
}

#[test]
fn failed_accept_reports_the_step_and_releases_the_flow() {
    let ctx = MockContext::new().fail_on(MockOperation::Accept, ErrorCode::Unable);
    let journal = ctx.journal();

    let error = serve(&config(&[]), || Ok(ctx), discard_sink).unwrap_err();

    assert_eq!(error.setup_step(), Some(SetupStep::Accept));
    assert_eq!(error.flow_error().map(FlowError::code), Some(ErrorCode::Unable));
    assert_eq!(journal.releases(journal.flows()[0]), 1);
}

#[test]
fn conflicting_request_fails_at_set_requirements() {
    let ctx = MockContext::new();
    let error = serve(
        &config(&["-P", "NEAT_PROPERTY_TCP_REQUIRED,NEAT_PROPERTY_TCP_BANNED"]),
        || Ok(ctx),
        discard_sink,
    )
    .unwrap_err();

    assert_eq!(error.setup_step(), Some(SetupStep::SetRequirements));
    assert_eq!(
        error.flow_error().map(FlowError::code),
        Some(ErrorCode::BadArgument)
    );
}

#[test]
fn context_creation_failure_is_a_setup_error() {
    let error = serve(
        &config(&[]),
        || Err::<MockContext, _>(FlowError::from_kind(ErrorCode::OutOfMemory, INIT_CONTEXT)),
        discard_sink,
    )
    .unwrap_err();

    assert_eq!(error.setup_step(), Some(SetupStep::InitContext));
}

#[test]
fn continuous_mode_accepts_again_after_each_close() {
    let ctx = MockContext::new()
        .connection(MockConnection::tcp_v4().data(b"first".to_vec()).close())
        .connection(MockConnection::tcp_v4().data(b"second".to_vec()).close());
    let journal = ctx.journal();

    let report = serve(
        &config(&[]).with_accept_mode(AcceptMode::Continuous),
        || Ok(ctx),
        discard_sink,
    )
    .unwrap();

    let closed: Vec<_> = report
        .sessions
        .iter()
        .filter(|session| session.peer_closed)
        .collect();
    assert_eq!(closed.len(), 2);
    assert_eq!(report.total_bytes(), 11);
    assert_eq!(journal.accepts(), 3);
    for flow in journal.flows() {
        assert_eq!(journal.releases(flow), 1);
    }
}

#[test]
#[traced_test]
fn explicit_options_are_echoed() {
    config(&["-S", "64", "-v", "1"]).log_options();
    assert!(logs_contain("option - buffer size: 64"));
    assert!(logs_contain("option - log level: 1"));
    assert!(!logs_contain("option - properties"));
}
