use mbmap::coils::{self, CoilLayout};
use mbmap::codec::{ByteOrder, Field, WordOrder};
use mbmap::error::Error;
use mbmap::registers::{RegisterLayout, Variable};
use mbmap::store::{DataStore, SlaveStore};
use mbmap::threaded::Client;
use mbmap::transport::InMemoryTransport;
use mbmap::{ServerContextLayout, SlaveContextLayout, Value, Values};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_millis(3330);

fn values(pairs: &[(&str, Value)]) -> Values {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn bits(pattern: &[u8]) -> Value {
    Value::Bits(pattern.iter().map(|&b| b != 0).collect())
}

fn holding_register_layout() -> RegisterLayout {
    RegisterLayout::with_orders(
        vec![
            Variable::string("str", 5, 2).unwrap(),
            Variable::number("i", "i32", None).unwrap(),
            Variable::record(
                "struct",
                vec![
                    Field::new("CHANGED", "u1").unwrap(),
                    Field::new("ELEMENT_TYPE", "u7").unwrap(),
                    Field::new("ELEMENT_ID", "u5").unwrap(),
                ],
                19,
            )
            .unwrap(),
            Variable::number("f", "f16", None).unwrap(),
        ],
        ByteOrder::Little,
        WordOrder::Big,
    )
    .unwrap()
}

fn server_context_layout() -> ServerContextLayout {
    ServerContextLayout::new(BTreeMap::from([
        (
            0,
            SlaveContextLayout {
                holding_registers: Some(holding_register_layout()),
                input_registers: Some(
                    RegisterLayout::new(vec![
                        Variable::number("a", "u16", None).unwrap(),
                        Variable::number("b", "u16", None).unwrap(),
                        Variable::number("c", "u16", None).unwrap(),
                    ])
                    .unwrap(),
                ),
                coils: Some(
                    CoilLayout::new(vec![
                        coils::Variable::new("x", 3, None).unwrap(),
                        coils::Variable::new("y", 1, 7).unwrap(),
                        coils::Variable::new("z", 5, None).unwrap(),
                        coils::Variable::new("u", 1, None).unwrap(),
                        coils::Variable::new("v", 2, None).unwrap(),
                    ])
                    .unwrap(),
                ),
                ..Default::default()
            },
        ),
        (
            1,
            SlaveContextLayout {
                discrete_inputs: Some(
                    CoilLayout::new(vec![
                        coils::Variable::new("a", 1, None).unwrap(),
                        coils::Variable::new("b", 2, None).unwrap(),
                        coils::Variable::new("c", 3, None).unwrap(),
                    ])
                    .unwrap(),
                ),
                ..Default::default()
            },
        ),
        // This layout refers to a unit the datastore does not have.
        (
            2,
            SlaveContextLayout {
                holding_registers: Some(
                    RegisterLayout::new(vec![Variable::number("a", "i32", None).unwrap()])
                        .unwrap(),
                ),
                ..Default::default()
            },
        ),
        // Empty layout for testing missing sub-layout errors.
        (3, SlaveContextLayout::default()),
    ]))
}

fn data_store() -> Arc<DataStore> {
    Arc::new(DataStore::new(BTreeMap::from([
        (0, SlaveStore::new(100, 100)),
        (
            1,
            SlaveStore::with_blocks(
                vec![0; 100],
                (0..100).collect(),
                vec![false; 100],
                [false, false, true, false, false, true]
                    .into_iter()
                    .chain(std::iter::repeat_n(false, 94))
                    .collect(),
            ),
        ),
        (3, SlaveStore::new(100, 100)),
    ])))
}

fn started_client() -> Client {
    let store = data_store();
    let mut client = Client::new(
        move || Ok(InMemoryTransport::new(store)),
        server_context_layout(),
    );
    client.start(TIMEOUT).unwrap();
    client
}

#[test]
fn write_then_read_holding_registers() {
    let mut client = started_client();
    let written = values(&[
        ("str", Value::from("hello")),
        ("i", Value::Int(12)),
        (
            "struct",
            Value::Record(HashMap::from([
                ("CHANGED".to_owned(), 1),
                ("ELEMENT_TYPE".to_owned(), 33),
                ("ELEMENT_ID".to_owned(), 7),
            ])),
        ),
        ("f", Value::Float(3.4)),
    ]);
    client.write_holding_registers(&written, 0).unwrap();

    let read = client.read_holding_registers(None, 0).unwrap();
    assert_eq!(read["str"], written["str"]);
    assert_eq!(read["i"], written["i"]);
    assert_eq!(read["struct"], written["struct"]);
    assert!((read["f"].as_f64().unwrap() - 3.4).abs() < 1e-3);

    client.stop(TIMEOUT).unwrap();
}

#[test]
fn read_input_registers_returns_all_declared_variables() {
    let mut client = started_client();
    let read = client.read_input_registers(None, 0).unwrap();
    assert_eq!(
        read,
        values(&[
            ("a", Value::UInt(0)),
            ("b", Value::UInt(0)),
            ("c", Value::UInt(0)),
        ])
    );
    client.stop(TIMEOUT).unwrap();
}

#[test]
fn read_discrete_inputs_of_prefilled_unit() {
    let mut client = started_client();
    let read = client.read_discrete_inputs(None, 1).unwrap();
    assert_eq!(read["a"], Value::Bit(false));
    assert_eq!(read["b"], bits(&[0, 1]));
    assert_eq!(read["c"], bits(&[0, 0, 1]));
    client.stop(TIMEOUT).unwrap();
}

#[test]
fn write_then_read_coils() {
    let mut client = started_client();
    let written = values(&[
        ("x", bits(&[0, 1, 0])),
        ("y", Value::Bit(true)),
        ("z", bits(&[0, 0, 1, 1, 0])),
        ("u", Value::Bit(false)),
        ("v", bits(&[0, 1])),
    ]);
    client.write_coils(&written, 0).unwrap();
    assert_eq!(client.read_coils(None, 0).unwrap(), written);
    client.stop(TIMEOUT).unwrap();
}

#[test]
fn missing_sub_layout_and_missing_slave_layout() {
    let mut client = started_client();
    assert!(matches!(
        client.read_coils(None, 3),
        Err(Error::MissingSubLayout { .. })
    ));
    assert!(matches!(
        client.read_coils(None, 4),
        Err(Error::NoSuchSlaveLayout(4))
    ));
    client.stop(TIMEOUT).unwrap();
}

#[test]
fn missing_unit_in_datastore_fails_response_validation() {
    let mut client = started_client();
    assert!(matches!(
        client.read_holding_registers(None, 2),
        Err(Error::ModbusResponse { .. })
    ));
    client.stop(TIMEOUT).unwrap();
}

#[test]
fn operations_require_started_client() {
    let store = data_store();
    let mut client = Client::new(
        move || Ok(InMemoryTransport::new(store)),
        server_context_layout(),
    );
    assert!(matches!(
        client.read_coils(None, 0),
        Err(Error::NotConnected)
    ));
}

#[test]
fn operations_fail_after_stop() {
    let mut client = started_client();
    client.stop(TIMEOUT).unwrap();
    assert!(matches!(
        client.read_coils(None, 0),
        Err(Error::NotConnected)
    ));
}

#[test]
fn client_can_only_be_started_once() {
    let mut client = started_client();
    assert!(client.start(TIMEOUT).is_err());
    client.stop(TIMEOUT).unwrap();
}

#[test]
fn connect_failure_is_reported_from_start() {
    let mut client = Client::new(
        || -> mbmap::Result<InMemoryTransport> {
            Err(Error::Encoding("no route to host".to_owned()))
        },
        server_context_layout(),
    );
    assert!(matches!(
        client.start(TIMEOUT),
        Err(Error::Encoding(_))
    ));
}

#[test]
fn write_single_variable_via_lookup() {
    let mut client = started_client();
    client.write("str", Value::from("hello")).unwrap();
    assert_eq!(
        client.read_holding_register("str", 0).unwrap(),
        Value::from("hello")
    );

    client.write("y", Value::Bit(true)).unwrap();
    assert_eq!(client.read_coil("y", 0).unwrap(), Value::Bit(true));

    // "b" is found in the input registers of unit 0, which are read-only
    // over the wire.
    assert!(client.write("b", Value::Bit(true)).is_err());
    client.stop(TIMEOUT).unwrap();
}

#[test]
fn single_variable_reads() {
    let mut client = started_client();
    client
        .write_holding_register("i", Value::Int(-99), 0)
        .unwrap();
    assert_eq!(
        client.read_holding_register("i", 0).unwrap(),
        Value::Int(-99)
    );
    assert_eq!(
        client.read_input_register("b", 0).unwrap(),
        Value::UInt(0)
    );
    assert_eq!(
        client.read_discrete_input("a", 1).unwrap(),
        Value::Bit(false)
    );
    client.stop(TIMEOUT).unwrap();
}
