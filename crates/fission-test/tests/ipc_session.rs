//! Wire-protocol session tests: a miniature coordinator drives a real
//! engine service over a TCP socket, including the out-of-band plan-fetch
//! and dependency sub-protocols.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use fission_codec::rowcodec;
use fission_codec::SerializeInput;
use fission_common::types::DataType;
use fission_common::{Row, Value};
use fission_ipc::{status, CommandCode, EngineService};
use fission_plan::{PlanFragment, PlanNode};
use fission_test::{insert_values_fragment, pairs_catalog, scan_fragment};

/// Frames and sends one command.
fn send_command(stream: &mut TcpStream, code: CommandCode, payload: &[u8]) {
    let size = (8 + payload.len()) as u32;
    let mut frame = Vec::with_capacity(size as usize);
    frame.extend_from_slice(&size.to_be_bytes());
    frame.extend_from_slice(&code.as_i32().to_be_bytes());
    frame.extend_from_slice(payload);
    stream.write_all(&frame).unwrap();
    stream.flush().unwrap();
}

fn read_i8(stream: &mut TcpStream) -> i8 {
    let mut byte = [0u8; 1];
    stream.read_exact(&mut byte).unwrap();
    byte[0] as i8
}

fn read_i16(stream: &mut TcpStream) -> i16 {
    let mut bytes = [0u8; 2];
    stream.read_exact(&mut bytes).unwrap();
    i16::from_be_bytes(bytes)
}

fn read_i32(stream: &mut TcpStream) -> i32 {
    let mut bytes = [0u8; 4];
    stream.read_exact(&mut bytes).unwrap();
    i32::from_be_bytes(bytes)
}

fn read_i64(stream: &mut TcpStream) -> i64 {
    let mut bytes = [0u8; 8];
    stream.read_exact(&mut bytes).unwrap();
    i64::from_be_bytes(bytes)
}

fn read_length_prefixed(stream: &mut TcpStream) -> Vec<u8> {
    let length = read_i32(stream);
    assert!(length >= 0, "negative payload length {length}");
    let mut payload = vec![0u8; length as usize];
    stream.read_exact(&mut payload).unwrap();
    payload
}

/// Services out-of-band engine requests until a terminal reply status
/// arrives, then returns it. The caller reads the reply body.
fn pump_callbacks(
    stream: &mut TcpStream,
    plans: &HashMap<i64, Vec<u8>>,
    dependencies: &HashMap<i32, Vec<u8>>,
) -> i8 {
    loop {
        let byte = read_i8(stream);
        match byte {
            status::FETCH_PLAN => {
                let fragment_id = read_i64(stream);
                match plans.get(&fragment_id) {
                    Some(plan) => {
                        let mut reply = vec![status::SUCCESS as u8];
                        reply.extend_from_slice(&(plan.len() as i32).to_be_bytes());
                        reply.extend_from_slice(plan);
                        stream.write_all(&reply).unwrap();
                    }
                    None => stream.write_all(&[status::ERROR as u8]).unwrap(),
                }
            }
            status::RETRIEVE_DEPENDENCY => {
                let dependency_id = read_i32(stream);
                match dependencies.get(&dependency_id) {
                    Some(payload) => {
                        let mut reply = vec![status::DEPENDENCY_FOUND as u8];
                        reply.extend_from_slice(&(payload.len() as i32).to_be_bytes());
                        reply.extend_from_slice(payload);
                        stream.write_all(&reply).unwrap();
                    }
                    None => stream
                        .write_all(&[status::DEPENDENCY_NOT_FOUND as u8])
                        .unwrap(),
                }
            }
            status::HANDOFF_EXPORT_BUFFER => {
                let _table_id = read_i32(stream);
                let _start_uso = read_i64(stream);
                let _buffer = read_length_prefixed(stream);
            }
            other => return other,
        }
    }
}

fn expect_simple_success(stream: &mut TcpStream) {
    assert_eq!(read_i8(stream), status::SUCCESS);
}

fn initialize_payload() -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&0i32.to_be_bytes()); // cluster
    payload.extend_from_slice(&0i64.to_be_bytes()); // site
    payload.extend_from_slice(&0i32.to_be_bytes()); // partition
    payload.extend_from_slice(&0i32.to_be_bytes()); // host
    payload.push(1); // lowest site
    payload.extend_from_slice(&0i64.to_be_bytes()); // log levels
    let hostname = b"test-host";
    payload.extend_from_slice(&(hostname.len() as i16).to_be_bytes());
    payload.extend_from_slice(hostname);
    payload
}

fn load_catalog_payload() -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&1i64.to_be_bytes()); // version
    payload.extend_from_slice(&serde_json::to_vec(&pairs_catalog()).unwrap());
    payload
}

fn load_table_payload(undo_token: i64, rows: &[(i32, i32)]) -> Vec<u8> {
    let rows: Vec<Row> = rows
        .iter()
        .map(|&(a, b)| Row::new(vec![Value::Int(a), Value::Int(b)]))
        .collect();
    let body = rowcodec::encode_table_payload(&[DataType::Int, DataType::Int], &rows);

    let mut payload = Vec::new();
    payload.extend_from_slice(&0i32.to_be_bytes()); // table id
    payload.extend_from_slice(&1i64.to_be_bytes()); // txn id
    payload.extend_from_slice(&1i64.to_be_bytes()); // sp handle
    payload.extend_from_slice(&0i64.to_be_bytes()); // last committed
    payload.extend_from_slice(&1i64.to_be_bytes()); // unique id
    payload.extend_from_slice(&undo_token.to_be_bytes());
    payload.push(0); // return conflicts
    payload.extend_from_slice(&body);
    payload
}

fn custom_fragment_payload(fragment: &PlanFragment, undo_token: i64) -> Vec<u8> {
    let plan = fragment.to_json().unwrap();
    let mut payload = Vec::new();
    payload.extend_from_slice(&1i64.to_be_bytes()); // txn id
    payload.extend_from_slice(&1i64.to_be_bytes()); // sp handle
    payload.extend_from_slice(&0i64.to_be_bytes()); // last committed
    payload.extend_from_slice(&undo_token.to_be_bytes());
    payload.extend_from_slice(&(-1i32).to_be_bytes()); // input dep
    payload.extend_from_slice(&(plan.len() as i32).to_be_bytes());
    payload.extend_from_slice(&plan);
    payload.extend_from_slice(&0i16.to_be_bytes()); // parameter count
    payload
}

fn batch_payload(fragment_ids: &[i64], input_deps: &[i32], undo_token: i64) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&1i64.to_be_bytes()); // txn id
    payload.extend_from_slice(&1i64.to_be_bytes()); // sp handle
    payload.extend_from_slice(&0i64.to_be_bytes()); // last committed
    payload.extend_from_slice(&1i64.to_be_bytes()); // unique id
    payload.extend_from_slice(&undo_token.to_be_bytes());
    payload.push(0); // trace
    payload.extend_from_slice(&(fragment_ids.len() as i32).to_be_bytes());
    for id in fragment_ids {
        payload.extend_from_slice(&id.to_be_bytes());
    }
    for dep in input_deps {
        payload.extend_from_slice(&dep.to_be_bytes());
    }
    for _ in fragment_ids {
        payload.extend_from_slice(&0i16.to_be_bytes()); // parameter count
    }
    payload
}

fn decode_result_rows(payload: &[u8]) -> Vec<(i32, Vec<Row>)> {
    let mut input = SerializeInput::new(payload);
    let mut sets = Vec::new();
    while input.remaining() > 0 {
        sets.push(rowcodec::read_result_set(&mut input).unwrap());
    }
    sets
}

fn start_service() -> TcpStream {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        stream.set_nodelay(true).unwrap();
        EngineService::new(stream).run().unwrap();
    });
    let stream = TcpStream::connect(address).unwrap();
    stream.set_nodelay(true).unwrap();
    stream
}

#[test]
fn full_session_over_the_wire() {
    let mut stream = start_service();
    let no_plans = HashMap::new();
    let no_deps = HashMap::new();

    send_command(&mut stream, CommandCode::Initialize, &initialize_payload());
    expect_simple_success(&mut stream);

    send_command(&mut stream, CommandCode::LoadCatalog, &load_catalog_payload());
    expect_simple_success(&mut stream);

    send_command(
        &mut stream,
        CommandCode::LoadTable,
        &load_table_payload(100, &[(1, 10), (2, 20)]),
    );
    expect_simple_success(&mut stream);

    // Scan through an ad-hoc fragment.
    send_command(
        &mut stream,
        CommandCode::ExecuteCustomPlanFragment,
        &custom_fragment_payload(&scan_fragment("pairs"), i64::MAX),
    );
    assert_eq!(
        pump_callbacks(&mut stream, &no_plans, &no_deps),
        status::SUCCESS
    );
    let results = read_length_prefixed(&mut stream);
    let sets = decode_result_rows(&results);
    assert_eq!(sets[0].1.len(), 2);

    // Roll the load back and observe the empty table.
    let mut token = Vec::new();
    token.extend_from_slice(&100i64.to_be_bytes());
    send_command(&mut stream, CommandCode::UndoUndoToken, &token);
    expect_simple_success(&mut stream);

    send_command(
        &mut stream,
        CommandCode::ExecuteCustomPlanFragment,
        &custom_fragment_payload(&scan_fragment("pairs"), i64::MAX),
    );
    assert_eq!(
        pump_callbacks(&mut stream, &no_plans, &no_deps),
        status::SUCCESS
    );
    let results = read_length_prefixed(&mut stream);
    assert!(decode_result_rows(&results)[0].1.is_empty());

    send_command(&mut stream, CommandCode::Terminate, &[]);
    expect_simple_success(&mut stream);
}

#[test]
fn plan_fetch_subprotocol_runs_once_per_fragment() {
    let mut stream = start_service();
    let mut plans = HashMap::new();
    plans.insert(
        0xDEADi64,
        scan_fragment("pairs").to_json().unwrap(),
    );
    let no_deps = HashMap::new();

    send_command(&mut stream, CommandCode::Initialize, &initialize_payload());
    expect_simple_success(&mut stream);
    send_command(&mut stream, CommandCode::LoadCatalog, &load_catalog_payload());
    expect_simple_success(&mut stream);

    // First execution: the engine must come back for the plan.
    send_command(
        &mut stream,
        CommandCode::ExecuteQueryPlanFragments,
        &batch_payload(&[0xDEAD], &[-1], 10),
    );
    assert_eq!(pump_callbacks(&mut stream, &plans, &no_deps), status::SUCCESS);
    let _results = read_length_prefixed(&mut stream);

    // Second execution: served from the cache; an empty plan table proves
    // no fetch was issued (a fetch would fail and the batch with it).
    let empty_plans = HashMap::new();
    send_command(
        &mut stream,
        CommandCode::ExecuteQueryPlanFragments,
        &batch_payload(&[0xDEAD], &[-1], 11),
    );
    assert_eq!(
        pump_callbacks(&mut stream, &empty_plans, &no_deps),
        status::SUCCESS
    );
    let _results = read_length_prefixed(&mut stream);

    send_command(&mut stream, CommandCode::Terminate, &[]);
    expect_simple_success(&mut stream);
}

#[test]
fn dependency_subprotocol_feeds_receive_fragments() {
    let mut stream = start_service();

    // Fragment 7 receives its input rows from the host and inserts them.
    let receive_insert = PlanFragment::new(vec![
        PlanNode::Receive,
        PlanNode::Insert {
            table: "pairs".to_string(),
        },
        PlanNode::Send,
    ]);
    let mut plans = HashMap::new();
    plans.insert(7i64, receive_insert.to_json().unwrap());

    // Dependency 5 carries two rows: [i32 row_count][rows…].
    let mut dep_payload = Vec::new();
    dep_payload.extend_from_slice(&2i32.to_be_bytes());
    let mut out = fission_codec::VecOutput::new();
    rowcodec::write_row(&mut out, &Row::new(vec![Value::Int(1), Value::Int(10)])).unwrap();
    rowcodec::write_row(&mut out, &Row::new(vec![Value::Int(2), Value::Int(20)])).unwrap();
    dep_payload.extend_from_slice(out.as_slice());
    let mut dependencies = HashMap::new();
    dependencies.insert(5i32, dep_payload);

    send_command(&mut stream, CommandCode::Initialize, &initialize_payload());
    expect_simple_success(&mut stream);
    send_command(&mut stream, CommandCode::LoadCatalog, &load_catalog_payload());
    expect_simple_success(&mut stream);

    send_command(
        &mut stream,
        CommandCode::ExecuteQueryPlanFragments,
        &batch_payload(&[7], &[5], 10),
    );
    assert_eq!(
        pump_callbacks(&mut stream, &plans, &dependencies),
        status::SUCCESS
    );
    let _results = read_length_prefixed(&mut stream);

    // The inserted rows are visible to a follow-up scan.
    send_command(
        &mut stream,
        CommandCode::ExecuteCustomPlanFragment,
        &custom_fragment_payload(&scan_fragment("pairs"), i64::MAX),
    );
    let empty_plans: HashMap<i64, Vec<u8>> = HashMap::new();
    let empty_deps: HashMap<i32, Vec<u8>> = HashMap::new();
    assert_eq!(
        pump_callbacks(&mut stream, &empty_plans, &empty_deps),
        status::SUCCESS
    );
    let results = read_length_prefixed(&mut stream);
    assert_eq!(decode_result_rows(&results)[0].1.len(), 2);

    send_command(&mut stream, CommandCode::Terminate, &[]);
    expect_simple_success(&mut stream);
}

#[test]
fn batch_error_replies_with_exception_frame() {
    let mut stream = start_service();
    let mut plans = HashMap::new();
    plans.insert(
        9i64,
        insert_values_fragment("pairs", vec![vec![Value::Null, Value::Int(1)]])
            .to_json()
            .unwrap(),
    );
    let no_deps = HashMap::new();

    send_command(&mut stream, CommandCode::Initialize, &initialize_payload());
    expect_simple_success(&mut stream);
    send_command(&mut stream, CommandCode::LoadCatalog, &load_catalog_payload());
    expect_simple_success(&mut stream);

    send_command(
        &mut stream,
        CommandCode::ExecuteQueryPlanFragments,
        &batch_payload(&[9], &[-1], 10),
    );
    assert_eq!(pump_callbacks(&mut stream, &plans, &no_deps), status::ERROR);

    // Exception frame: [i16 length][length bytes].
    let length = read_i16(&mut stream);
    assert!(length > 0);
    let mut frame = vec![0u8; length as usize];
    stream.read_exact(&mut frame).unwrap();

    send_command(&mut stream, CommandCode::Terminate, &[]);
    expect_simple_success(&mut stream);
}

#[test]
fn unknown_command_yields_error_and_keeps_session() {
    let mut stream = start_service();

    send_command(&mut stream, CommandCode::Initialize, &initialize_payload());
    expect_simple_success(&mut stream);

    // Code 14 is retired; the reply is an error with an empty exception
    // frame and the session stays usable.
    let size = 8u32;
    let mut frame = Vec::new();
    frame.extend_from_slice(&size.to_be_bytes());
    frame.extend_from_slice(&14i32.to_be_bytes());
    stream.write_all(&frame).unwrap();
    assert_eq!(read_i8(&mut stream), status::ERROR);
    assert_eq!(read_i16(&mut stream), 0);

    send_command(&mut stream, CommandCode::Terminate, &[]);
    expect_simple_success(&mut stream);
}
