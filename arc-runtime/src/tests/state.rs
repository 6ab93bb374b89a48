use arc_types::ir::{Digest, Edge, Handle, Ir, Node as IrNode, Param};
use arc_types::telem::{DataType, Frame, SampleValue, Series, TimeStamp, MICROSECOND};

use crate::errors::RuntimeError;
use crate::state::{Config, State};
use crate::testutil::ir_node;

fn state_with(nodes: Vec<IrNode>, edges: Vec<Edge>) -> State {
    State::new(Config {
        ir: Ir { nodes, edges },
        channels: vec![],
    })
    .unwrap()
}

fn minimal_state() -> State {
    let mut state = state_with(vec![ir_node("test", &[], &[])], vec![]);
    state.register_channel(10, DataType::F32);
    state.register_channel(20, DataType::F64);
    state
}

fn edge(from: (&str, &str), to: (&str, &str)) -> Edge {
    Edge::new(Handle::new(from.0, from.1), Handle::new(to.0, to.1))
}

fn fill_output(state: &mut State, node: &str, index: usize, values: &[f32]) {
    let times: Vec<TimeStamp> = (1..=values.len() as i64)
        .map(|i| TimeStamp(0) + i * MICROSECOND)
        .collect();
    assert!(state.set_output(
        node,
        index,
        Series::from_vec(values.to_vec()),
        Series::from_vec(times),
    ));
}

#[test]
fn create_state_and_look_up_node() {
    let state = state_with(vec![ir_node("test", &[], &[])], vec![]);
    assert!(state.has_node("test"));
    assert!(!state.has_node("ghost"));
}

#[test]
fn refresh_inputs_basic_alignment() {
    let mut state = state_with(
        vec![
            ir_node("producer", &[], &["output"]),
            ir_node("consumer", &["input"], &[]),
        ],
        vec![edge(("producer", "output"), ("consumer", "input"))],
    );
    fill_output(&mut state, "producer", 0, &[1.0, 2.0, 3.0]);

    assert!(state.refresh_inputs("consumer"));
    let input = state.input("consumer", 0).unwrap();
    assert_eq!(input.len(), 3);
    assert_eq!(input.at::<f32>(0), Some(1.0));
    assert_eq!(input.at::<f32>(1), Some(2.0));
    assert_eq!(input.at::<f32>(2), Some(3.0));
}

#[test]
fn refresh_inputs_no_trigger_on_empty_upstream() {
    let mut state = state_with(
        vec![
            ir_node("producer", &[], &["output"]),
            ir_node("consumer", &["input"], &[]),
        ],
        vec![edge(("producer", "output"), ("consumer", "input"))],
    );
    assert!(!state.refresh_inputs("consumer"));
}

#[test]
fn refresh_inputs_watermark_prevents_reprocessing() {
    let mut state = state_with(
        vec![
            ir_node("producer", &[], &["output"]),
            ir_node("consumer", &["input"], &[]),
        ],
        vec![edge(("producer", "output"), ("consumer", "input"))],
    );
    fill_output(&mut state, "producer", 0, &[1.0, 2.0]);

    assert!(state.refresh_inputs("consumer"));
    assert_eq!(state.input("consumer", 0).unwrap().len(), 2);

    // Same size, same producer identity: nothing to do.
    assert!(!state.refresh_inputs("consumer"));

    fill_output(&mut state, "producer", 0, &[1.0, 2.0, 3.0]);
    assert!(state.refresh_inputs("consumer"));
    assert_eq!(state.input("consumer", 0).unwrap().len(), 3);
}

#[test]
fn refresh_inputs_triggers_on_producer_identity_change() {
    let mut state = state_with(
        vec![
            ir_node("producer", &[], &["output"]),
            ir_node("consumer", &["input"], &[]),
        ],
        vec![edge(("producer", "output"), ("consumer", "input"))],
    );
    fill_output(&mut state, "producer", 0, &[1.0, 2.0]);
    assert!(state.refresh_inputs("consumer"));
    assert!(!state.refresh_inputs("consumer"));

    // Re-registering the producer resets its buffers with a fresh identity;
    // the same size must still trigger downstream.
    state.register_node(ir_node("producer", &[], &["output"]));
    fill_output(&mut state, "producer", 0, &[5.0, 6.0]);
    assert!(state.refresh_inputs("consumer"));
    assert_eq!(state.input("consumer", 0).unwrap().at::<f32>(0), Some(5.0));
}

#[test]
fn multi_input_node_requires_all_producers() {
    let mut state = state_with(
        vec![
            ir_node("producer1", &[], &["output"]),
            ir_node("producer2", &[], &["output"]),
            ir_node("consumer", &["input1", "input2"], &[]),
        ],
        vec![
            edge(("producer1", "output"), ("consumer", "input1")),
            edge(("producer2", "output"), ("consumer", "input2")),
        ],
    );

    fill_output(&mut state, "producer1", 0, &[1.0, 2.0]);
    assert!(!state.refresh_inputs("consumer"));

    fill_output(&mut state, "producer2", 0, &[10.0, 20.0]);
    assert!(state.refresh_inputs("consumer"));
    assert_eq!(state.input("consumer", 0).unwrap().len(), 2);
    assert_eq!(state.input("consumer", 1).unwrap().len(), 2);
    assert_eq!(state.input("consumer", 0).unwrap().at::<f32>(0), Some(1.0));
    assert_eq!(state.input("consumer", 1).unwrap().at::<f32>(0), Some(10.0));
}

#[test]
fn unconnected_default_is_consumed_exactly_once() {
    let mut node = ir_node("consumer", &[], &[]);
    node.inputs
        .push(Param::new("input1", DataType::F32).with_value(SampleValue::F32(42.0)));
    let mut state = state_with(vec![node], vec![]);

    assert!(state.refresh_inputs("consumer"));
    let input = state.input("consumer", 0).unwrap();
    assert_eq!(input.len(), 1);
    assert_eq!(input.at::<f32>(0), Some(42.0));

    assert!(!state.refresh_inputs("consumer"));
}

#[test]
fn connected_input_overrides_default() {
    let mut consumer = ir_node("consumer", &[], &[]);
    consumer
        .inputs
        .push(Param::new("input", DataType::F32).with_value(SampleValue::F32(42.0)));
    let mut state = state_with(
        vec![ir_node("producer", &[], &["output"]), consumer],
        vec![edge(("producer", "output"), ("consumer", "input"))],
    );
    fill_output(&mut state, "producer", 0, &[100.0, 200.0]);

    assert!(state.refresh_inputs("consumer"));
    let input = state.input("consumer", 0).unwrap();
    assert_eq!(input.len(), 2);
    assert_eq!(input.at::<f32>(0), Some(100.0));
    assert_eq!(input.at::<f32>(1), Some(200.0));
}

#[test]
fn flush_preserves_latest_series_and_discards_older() {
    let mut state = minimal_state();
    state.ingest(Frame::single(10, Series::from_vec(vec![1.0f32, 2.0, 3.0])));
    state.ingest(Frame::single(10, Series::from_vec(vec![4.0f32, 5.0])));

    let before = state.read_channel(10).unwrap();
    assert_eq!(before.series.len(), 2);

    state.flush();

    let after = state.read_channel(10).unwrap();
    assert_eq!(after.series.len(), 1);
    assert_eq!(after.series[0].len(), 2);
    assert_eq!(after.series[0].at::<f32>(0), Some(4.0));
    assert_eq!(after.series[0].at::<f32>(1), Some(5.0));
}

#[test]
fn flush_preserves_multiple_channels() {
    let mut state = minimal_state();
    state.ingest(Frame::single(10, Series::from_vec(vec![1.0f32, 2.0])));
    state.ingest(Frame::single(20, Series::from_vec(vec![10.0f64, 20.0, 30.0])));

    state.flush();

    let ch10 = state.read_channel(10).unwrap();
    assert_eq!(ch10.series.len(), 1);
    assert_eq!(ch10.series[0].at::<f32>(-1), Some(2.0));

    let ch20 = state.read_channel(20).unwrap();
    assert_eq!(ch20.series.len(), 1);
    assert_eq!(ch20.series[0].at::<f64>(-1), Some(30.0));
}

#[test]
fn preserved_data_stays_visible_on_the_next_cycle() {
    let mut state = minimal_state();
    state.ingest(Frame::single(10, Series::from_vec(vec![1.0f32, 2.0])));
    state.flush();

    state.ingest(Frame::single(20, Series::from_vec(vec![3.0f64, 4.0])));

    assert_eq!(
        state.read_channel(10).unwrap().series[0].at::<f32>(-1),
        Some(2.0)
    );
    assert_eq!(
        state.read_channel(20).unwrap().series[0].at::<f64>(-1),
        Some(4.0)
    );

    state.flush();

    assert_eq!(
        state.read_channel(10).unwrap().series[0].at::<f32>(-1),
        Some(2.0)
    );
    assert_eq!(
        state.read_channel(20).unwrap().series[0].at::<f64>(-1),
        Some(4.0)
    );
}

#[test]
fn new_data_overwrites_preserved() {
    let mut state = minimal_state();
    state.ingest(Frame::single(10, Series::from_vec(vec![100.0f32])));
    state.flush();
    assert_eq!(
        state.read_channel(10).unwrap().series[0].at::<f32>(-1),
        Some(100.0)
    );

    state.ingest(Frame::single(10, Series::from_vec(vec![200.0f32])));
    state.flush();

    let after = state.read_channel(10).unwrap();
    assert_eq!(after.series.len(), 1);
    assert_eq!(after.series[0].at::<f32>(-1), Some(200.0));
}

#[test]
fn flush_with_a_single_series_is_a_no_op() {
    let mut state = minimal_state();
    state.register_channel(30, DataType::I32);
    state.ingest(Frame::single(30, Series::from_vec(vec![1i32, 2, 3])));

    state.flush();

    let data = state.read_channel(30).unwrap();
    assert_eq!(data.series.len(), 1);
    assert_eq!(data.series[0].len(), 3);
    assert_eq!(data.series[0].at::<i32>(0), Some(1));
    assert_eq!(data.series[0].at::<i32>(2), Some(3));
}

#[test]
fn read_on_empty_state_reports_no_data() {
    let mut state = minimal_state();
    state.flush();
    assert!(matches!(
        state.read_channel(10),
        Err(RuntimeError::NoData(10))
    ));
}

#[test]
fn read_unknown_channel_reports_not_found() {
    let mut state = minimal_state();
    state.ingest(Frame::single(10, Series::from_vec(vec![1.0f32])));
    assert!(matches!(
        state.read_channel(99),
        Err(RuntimeError::ChannelNotFound(99))
    ));
}

#[test]
fn ingest_silently_drops_unregistered_channels() {
    let mut state = minimal_state();
    state.ingest(Frame::single(77, Series::from_vec(vec![1.0f32])));
    assert!(matches!(
        state.read_channel(77),
        Err(RuntimeError::ChannelNotFound(77))
    ));
}

#[test]
fn write_channel_carries_timestamps_to_the_index_channel() {
    let mut state = minimal_state();
    state.register_digest(&Digest {
        key: 40,
        data_type: DataType::F64,
        index: 41,
    });
    state.write_channel(
        40,
        Series::from_vec(vec![9.5f64]),
        Series::from_vec(vec![TimeStamp(123)]),
    );

    let writes = state.flush();
    assert_eq!(writes.len(), 2);
    // Flush order is key order.
    assert_eq!(writes[0].0, 40);
    assert_eq!(writes[0].1.at::<f64>(0), Some(9.5));
    assert_eq!(writes[1].0, 41);
    assert_eq!(writes[1].1.at::<TimeStamp>(0), Some(TimeStamp(123)));
}

#[test]
fn flush_returns_writes_and_clears_them() {
    let mut state = minimal_state();
    state.write_channel(
        20,
        Series::from_vec(vec![1.0f64]),
        Series::from_vec(vec![TimeStamp(1)]),
    );
    let writes = state.flush();
    assert_eq!(writes.len(), 1);
    assert!(state.flush().is_empty());
}
