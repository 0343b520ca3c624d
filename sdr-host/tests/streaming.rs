//! End-to-end streaming against the simulated device

use num_complex::Complex;
use sdr_host::devices::{self, SimDevice};
use sdr_host::streaming::{
    AsyncEventCode, OtwFormat, RxErrorCode, RxMetadata, RxStreamer, StreamCmd, StreamMode,
    StreamState, TxMetadata,
};
use sdr_host::{Device, DeviceAddr, DeviceFilter, DeviceRegistry, StreamArgs, TimeSpec};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_millis(200);
const TICK_RATE: f64 = 1e6;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn sim_device(args: &str) -> Arc<dyn Device> {
    init_logging();
    let registry = DeviceRegistry::new();
    devices::register_all(&registry);
    registry
        .make(&DeviceAddr::parse(args), DeviceFilter::Any, 0)
        .unwrap()
}

fn recv_one(rx: &mut RxStreamer, buff: &mut [Complex<i16>], md: &mut RxMetadata) -> usize {
    let n = buff.len();
    rx.recv(&mut [buff], n, md, TIMEOUT, false).unwrap()
}

fn assert_ramp(samples: &[Complex<i16>]) {
    for pair in samples.windows(2) {
        assert_eq!(pair[1].re.wrapping_sub(pair[0].re) & 0x7fff, 1, "ramp broken at {:?}", pair);
        assert_eq!(pair[0].im, -pair[0].re);
    }
}

#[test]
fn test_num_samps_and_done() {
    let device = sim_device("type=sim");
    let mut rx = device.get_rx_stream(&StreamArgs::new(vec![0])).unwrap();
    assert_eq!(rx.max_num_samps(), 200);

    rx.issue_stream_cmd(&StreamCmd::num_samps_and_done(1000)).unwrap();
    let mut buff = vec![Complex::<i16>::default(); 1000];
    let mut md = RxMetadata::default();
    let n = recv_one(&mut rx, &mut buff, &mut md);

    assert_eq!(n, 1000);
    assert_eq!(md.error_code, RxErrorCode::None);
    assert!(md.has_time_spec);
    assert!(md.start_of_burst);
    assert!(md.end_of_burst);
    assert!(!md.more_fragments);
    assert_ramp(&buff);
    assert_eq!(rx.state(), StreamState::Idle);

    // Nothing more was asked for
    let n = recv_one(&mut rx, &mut buff[..100], &mut md);
    assert_eq!(n, 0);
    assert_eq!(md.error_code, RxErrorCode::Timeout);
}

#[test]
fn test_num_samps_and_done_over_many_calls() {
    let device = sim_device("type=sim");
    let mut rx = device.get_rx_stream(&StreamArgs::new(vec![0])).unwrap();
    rx.issue_stream_cmd(&StreamCmd::num_samps_and_done(1000)).unwrap();

    let mut all = Vec::with_capacity(1000);
    let mut buff = vec![Complex::<i16>::default(); 150];
    let mut md = RxMetadata::default();
    let mut calls = 0;
    while all.len() < 1000 {
        let n = recv_one(&mut rx, &mut buff, &mut md);
        assert_eq!(md.error_code, RxErrorCode::None, "after {} samples", all.len());
        assert!(n > 0);
        all.extend_from_slice(&buff[..n]);
        calls += 1;
    }
    assert_eq!(all.len(), 1000);
    assert!(md.end_of_burst);
    assert!(!md.more_fragments);
    assert!(calls > 1000 / 150);
    assert_ramp(&all);

    assert_eq!(recv_one(&mut rx, &mut buff, &mut md), 0);
    assert_eq!(md.error_code, RxErrorCode::Timeout);
}

#[test]
fn test_fragment_then_remainder() {
    let device = sim_device("type=sim");
    let mut rx = device.get_rx_stream(&StreamArgs::new(vec![0])).unwrap();
    rx.issue_stream_cmd(&StreamCmd::num_samps_and_done(200)).unwrap();

    let mut buff = vec![Complex::<i16>::default(); 150];
    let mut md = RxMetadata::default();
    assert_eq!(recv_one(&mut rx, &mut buff, &mut md), 150);
    assert!(md.more_fragments);
    assert_eq!(md.fragment_offset, 0);
    assert!(md.start_of_burst);
    let first_tick = md.time_spec.to_ticks(TICK_RATE);
    let last = buff[149];

    assert_eq!(recv_one(&mut rx, &mut buff, &mut md), 50);
    assert!(!md.more_fragments);
    assert_eq!(md.fragment_offset, 150);
    assert!(md.end_of_burst);
    assert_eq!(md.time_spec.to_ticks(TICK_RATE), first_tick + 150);
    assert_ramp(&[last, buff[0]]);
}

#[test]
fn test_timed_start_on_two_channels() {
    let device = sim_device("type=sim");
    let mut rx = device.get_rx_stream(&StreamArgs::new(vec![0, 1])).unwrap();
    let start = device.time_now() + TimeSpec::new(0.02);
    rx.issue_stream_cmd(&StreamCmd::num_samps_and_done(600).at(start))
        .unwrap();

    let mut a = vec![Complex::<f32>::default(); 600];
    let mut b = vec![Complex::<f32>::default(); 600];
    let mut md = RxMetadata::default();
    let n = rx
        .recv(&mut [&mut a[..], &mut b[..]], 600, &mut md, TIMEOUT, false)
        .unwrap();

    assert_eq!(n, 600);
    assert_eq!(md.error_code, RxErrorCode::None);
    assert_eq!(md.time_spec.to_ticks(TICK_RATE), start.to_ticks(TICK_RATE));
    assert!(md.end_of_burst);
    assert_eq!(a, b);
}

#[test]
fn test_late_command() {
    let device = sim_device("type=sim");
    let mut rx = device.get_rx_stream(&StreamArgs::new(vec![0])).unwrap();
    thread::sleep(Duration::from_millis(5));
    rx.issue_stream_cmd(&StreamCmd::num_samps_and_done(100).at(TimeSpec::new(0.0)))
        .unwrap();

    let mut buff = vec![Complex::<i16>::default(); 100];
    let mut md = RxMetadata::default();
    assert_eq!(recv_one(&mut rx, &mut buff, &mut md), 0);
    assert_eq!(md.error_code, RxErrorCode::LateCommand);
    assert_eq!(rx.state(), StreamState::Idle);
}

#[test]
fn test_broken_chain() {
    let device = sim_device("type=sim");
    let mut rx = device.get_rx_stream(&StreamArgs::new(vec![0])).unwrap();
    rx.issue_stream_cmd(&StreamCmd::num_samps_and_more(400)).unwrap();

    let mut buff = vec![Complex::<i16>::default(); 1000];
    let mut md = RxMetadata::default();
    assert_eq!(recv_one(&mut rx, &mut buff, &mut md), 400);
    assert_eq!(md.error_code, RxErrorCode::None);
    assert!(!md.end_of_burst);

    assert_eq!(recv_one(&mut rx, &mut buff, &mut md), 0);
    assert_eq!(md.error_code, RxErrorCode::BrokenChain);
    assert_eq!(rx.state(), StreamState::Idle);
}

#[test]
fn test_chained_commands_stay_contiguous() {
    let device = sim_device("type=sim");
    let mut rx = device.get_rx_stream(&StreamArgs::new(vec![0])).unwrap();
    rx.issue_stream_cmd(&StreamCmd::num_samps_and_more(300)).unwrap();
    rx.issue_stream_cmd(&StreamCmd::num_samps_and_done(300)).unwrap();

    let mut buff = vec![Complex::<i16>::default(); 600];
    let mut md = RxMetadata::default();
    let mut total = 0;
    while total < 600 {
        let n = recv_one(&mut rx, &mut buff[total..], &mut md);
        assert_eq!(md.error_code, RxErrorCode::None);
        assert!(n > 0);
        total += n;
    }
    assert!(md.end_of_burst);
    assert_ramp(&buff);
}

#[test]
fn test_continuous_overflow_recovers() {
    let device = sim_device("type=sim");
    let mut args = StreamArgs::new(vec![0]);
    args.args = DeviceAddr::parse("num_recv_frames=4");
    let mut rx = device.get_rx_stream(&args).unwrap();

    rx.issue_stream_cmd(&StreamCmd::start_continuous()).unwrap();
    // Let the device run far ahead of the host
    thread::sleep(Duration::from_millis(30));

    let mut buff = vec![Complex::<i16>::default(); 200];
    let mut md = RxMetadata::default();
    let mut overflowed = false;
    for _ in 0..10 {
        rx.recv(&mut [&mut buff[..]], 200, &mut md, TIMEOUT, true).unwrap();
        if md.error_code == RxErrorCode::Overflow {
            overflowed = true;
            break;
        }
    }
    assert!(overflowed);
    assert!(md.is_overflow());
    assert!(!md.is_sequence_error());
    assert_eq!(rx.state(), StreamState::Streaming(StreamMode::StartContinuous));

    // Streaming resumes with a new burst
    assert_eq!(rx.recv(&mut [&mut buff[..]], 200, &mut md, TIMEOUT, true).unwrap(), 200);
    assert_eq!(md.error_code, RxErrorCode::None);
    assert!(md.start_of_burst);

    rx.issue_stream_cmd(&StreamCmd::stop()).unwrap();
    let mut ended = false;
    for _ in 0..100 {
        rx.recv(&mut [&mut buff[..]], 200, &mut md, TIMEOUT, true).unwrap();
        if md.end_of_burst || md.error_code == RxErrorCode::Timeout {
            ended = md.end_of_burst;
            break;
        }
    }
    assert!(ended);
    assert_eq!(rx.state(), StreamState::Idle);
}

#[test]
fn test_fixed_count_overflow_halts() {
    let device = sim_device("type=sim");
    let mut args = StreamArgs::new(vec![0]);
    args.args = DeviceAddr::parse("num_recv_frames=2");
    let mut rx = device.get_rx_stream(&args).unwrap();

    rx.issue_stream_cmd(&StreamCmd::num_samps_and_done(20_000)).unwrap();
    thread::sleep(Duration::from_millis(20));

    let mut buff = vec![Complex::<i16>::default(); 200];
    let mut md = RxMetadata::default();
    let mut codes = Vec::new();
    loop {
        rx.recv(&mut [&mut buff[..]], 200, &mut md, Duration::from_millis(50), true)
            .unwrap();
        codes.push(md.error_code);
        if md.error_code == RxErrorCode::Timeout {
            break;
        }
    }
    assert!(codes.contains(&RxErrorCode::Overflow));
    assert!(codes.len() < 100);
    assert_eq!(rx.state(), StreamState::Idle);
}

#[test]
fn test_poll_never_times_out() {
    let device = sim_device("type=sim");
    let mut rx = device.get_rx_stream(&StreamArgs::new(vec![0])).unwrap();
    let mut md = RxMetadata::default();
    let mut none: [Complex<f32>; 0] = [];
    let n = rx
        .recv(&mut [&mut none[..]], 0, &mut md, Duration::from_millis(10), false)
        .unwrap();
    assert_eq!(n, 0);
    assert_eq!(md.error_code, RxErrorCode::None);
}

#[test]
fn test_sc8_wire_format() {
    let device = sim_device("type=sim");
    let args = StreamArgs {
        otw_format: OtwFormat::Sc8,
        channels: vec![0],
        args: DeviceAddr::parse("spp=100"),
    };
    let mut rx = device.get_rx_stream(&args).unwrap();
    rx.issue_stream_cmd(&StreamCmd::num_samps_and_done(100)).unwrap();

    let mut buff = vec![Complex::<i16>::default(); 100];
    let mut md = RxMetadata::default();
    assert_eq!(recv_one(&mut rx, &mut buff, &mut md), 100);
    assert!(buff.iter().all(|s| s.re & 0xff == 0));
}

#[test]
fn test_tx_burst_ack() {
    let device = sim_device("type=sim");
    let mut tx = device.get_tx_stream(&StreamArgs::new(vec![0])).unwrap();

    let samples = vec![Complex::<f32>::new(0.25, -0.25); 500];
    let sent = tx
        .send(&[&samples[..]], 500, &TxMetadata::burst(), TIMEOUT)
        .unwrap();
    assert_eq!(sent, 500);

    let event = tx.recv_async_msg(TIMEOUT).unwrap();
    assert_eq!(event.event_code, AsyncEventCode::BurstAck);
    assert_eq!(event.channel, 0);
    assert!(event.has_time_spec);
}

#[test]
fn test_tx_timed_burst() {
    let device = sim_device("type=sim");
    let mut tx = device.get_tx_stream(&StreamArgs::new(vec![0, 1])).unwrap();

    let at = device.time_now() + TimeSpec::new(0.01);
    let samples = vec![Complex::<i16>::new(100, 100); 300];
    let md = TxMetadata::burst().at(at);
    assert_eq!(tx.send(&[&samples[..], &samples[..]], 300, &md, TIMEOUT).unwrap(), 300);

    let mut channels = Vec::new();
    for _ in 0..2 {
        let event = tx.recv_async_msg(TIMEOUT).unwrap();
        assert_eq!(event.event_code, AsyncEventCode::BurstAck);
        assert!(event.time_spec.to_ticks(TICK_RATE) >= at.to_ticks(TICK_RATE));
        channels.push(event.channel);
    }
    channels.sort_unstable();
    assert_eq!(channels, vec![0, 1]);
}

#[test]
fn test_tx_late_burst_raises_time_error() {
    let device = sim_device("type=sim");
    let mut tx = device.get_tx_stream(&StreamArgs::new(vec![0])).unwrap();
    thread::sleep(Duration::from_millis(5));

    let samples = vec![Complex::<i16>::default(); 100];
    let md = TxMetadata::burst().at(TimeSpec::new(0.0));
    tx.send(&[&samples[..]], 100, &md, TIMEOUT).unwrap();

    let event = tx.recv_async_msg(TIMEOUT).unwrap();
    assert_eq!(event.event_code, AsyncEventCode::TimeError);
    assert!(tx.recv_async_msg(Duration::from_millis(20)).is_none());
}

#[test]
fn test_tx_stall_raises_underflow() {
    let device = sim_device("type=sim,underflow_timeout_ms=10");
    let mut tx = device.get_tx_stream(&StreamArgs::new(vec![0])).unwrap();

    let samples = vec![Complex::<i16>::default(); 100];
    let md = TxMetadata {
        start_of_burst: true,
        ..TxMetadata::default()
    };
    tx.send(&[&samples[..]], 100, &md, TIMEOUT).unwrap();

    let event = tx.recv_async_msg(Duration::from_millis(500)).unwrap();
    assert_eq!(event.event_code, AsyncEventCode::Underflow);
}

#[test]
fn test_tx_user_payload() {
    init_logging();
    let device = SimDevice::new(&DeviceAddr::parse("type=sim")).unwrap();
    let tx = device.get_tx_stream(&StreamArgs::new(vec![1])).unwrap();

    device.inject_user_payload(1, [1, 2, 3, 0xdead_beef]).unwrap();
    let event = tx.recv_async_msg(TIMEOUT).unwrap();
    assert_eq!(event.event_code, AsyncEventCode::UserPayload);
    assert_eq!(event.user_payload, [1, 2, 3, 0xdead_beef]);
    // Streamer-relative channel index
    assert_eq!(event.channel, 0);

    drop(tx);
    thread::sleep(Duration::from_millis(20));
    assert!(device.inject_user_payload(1, [0; 4]).is_err());
}
