use mbmap::codec::{ByteOrder, Field, WordOrder};
use mbmap::error::Error;
use mbmap::registers::{RegisterLayout, RegisterLayoutRecord, Variable};
use mbmap::{Value, Values};

fn layout() -> RegisterLayout {
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

fn values(pairs: &[(&str, Value)]) -> Values {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[test]
fn negative_address_is_rejected() {
    assert!(matches!(
        Variable::number("", "i64", -1),
        Err(Error::NegativeAddress { .. })
    ));
}

#[test]
fn eight_bit_number_is_rejected() {
    assert!(matches!(
        Variable::number("x", "i8", None),
        Err(Error::UnknownType(_))
    ));
    assert!(matches!(
        Variable::number("x", "u8", None),
        Err(Error::UnknownType(_))
    ));
}

#[test]
fn overlapping_addresses_are_rejected() {
    let result = RegisterLayout::new(vec![
        Variable::number("foo", "i64", 2).unwrap(),
        Variable::number("bar", "i32", 5).unwrap(),
    ]);
    assert!(matches!(result, Err(Error::InvalidAddressLayout { .. })));
}

#[test]
fn duplicate_names_are_rejected() {
    let result = RegisterLayout::new(vec![
        Variable::number("foo", "i64", 2).unwrap(),
        Variable::string("foo", 5, None).unwrap(),
    ]);
    assert!(matches!(result, Err(Error::DuplicateVariable(_))));
}

#[test]
fn empty_layout_is_rejected() {
    assert!(matches!(
        RegisterLayout::new(Vec::new()),
        Err(Error::NoVariables)
    ));
}

#[test]
fn derived_range_covers_all_variables() {
    let layout = layout();
    // str occupies [2, 5), i [5, 7), struct [19, 20), f [20, 21).
    assert_eq!(layout.address(), 2);
    assert_eq!(layout.end(), 21);
    assert_eq!(layout.size(), 19);
}

#[test]
fn layout_construction_is_deterministic() {
    assert_eq!(layout(), layout());
}

#[test]
fn build_payload_rejects_unknown_variables() {
    let result = layout().build_payload(&values(&[
        ("str", Value::from("hello")),
        ("world", Value::from("!")),
    ]));
    match result {
        Err(Error::VariableNotFound(names)) => assert_eq!(names, vec!["world".to_owned()]),
        other => panic!("expected VariableNotFound, got {other:?}"),
    }
}

#[test]
fn build_payload_reports_all_unknown_variables() {
    let result = layout().build_payload(&values(&[
        ("world", Value::Int(1)),
        ("spam", Value::Int(2)),
    ]));
    match result {
        Err(Error::VariableNotFound(mut names)) => {
            names.sort();
            assert_eq!(names, vec!["spam".to_owned(), "world".to_owned()]);
        }
        other => panic!("expected VariableNotFound, got {other:?}"),
    }
}

#[test]
fn build_payload_merges_adjacent_variables() {
    let layout = RegisterLayout::new(vec![
        Variable::number("a", "u16", 0).unwrap(),
        Variable::number("b", "u16", None).unwrap(),
        Variable::number("c", "u16", 3).unwrap(),
    ])
    .unwrap();

    // a and b are back-to-back, c sits behind a gap.
    let chunks = layout
        .build_payload(&values(&[
            ("a", Value::UInt(1)),
            ("b", Value::UInt(2)),
            ("c", Value::UInt(3)),
        ]))
        .unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].address, 0);
    assert_eq!(chunks[0].bytes, vec![0x00, 0x01, 0x00, 0x02]);
    assert_eq!(chunks[1].address, 3);
    assert_eq!(chunks[1].bytes, vec![0x00, 0x03]);
}

#[test]
fn build_payload_splits_on_unwritten_variables() {
    let layout = RegisterLayout::new(vec![
        Variable::number("a", "u16", 0).unwrap(),
        Variable::number("b", "u16", None).unwrap(),
        Variable::number("c", "u16", None).unwrap(),
    ])
    .unwrap();

    let chunks = layout
        .build_payload(&values(&[("a", Value::UInt(1)), ("c", Value::UInt(3))]))
        .unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].address, 0);
    assert_eq!(chunks[1].address, 2);
}

#[test]
fn build_payload_empty_values() {
    assert_eq!(layout().build_payload(&Values::new()).unwrap(), Vec::new());
}

#[test]
fn encode_returns_one_chunk_per_variable() {
    let chunks = layout()
        .encode(&values(&[
            ("str", Value::from("hello")),
            ("i", Value::Int(12)),
        ]))
        .unwrap();
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].address, 2);
    assert_eq!(chunks[0].bytes.len(), 6);
    assert_eq!(chunks[1].address, 5);
    assert_eq!(chunks[1].bytes.len(), 4);
}

#[test]
fn chunk_words_are_big_endian() {
    let chunk = mbmap::registers::Chunk {
        address: 0,
        bytes: vec![0x12, 0x34, 0xab, 0xcd],
    };
    assert_eq!(chunk.words(), vec![0x1234, 0xabcd]);
}

#[test]
fn decode_registers_returns_requested_subset() {
    let layout = layout();
    let mut raw = vec![0u16; layout.size() as usize];
    // "i" occupies registers 5 and 6, relative offsets 3 and 4; with
    // byteorder little and wordorder big, 12 encodes as [00 00, 0c 00],
    // stored as the big-endian registers 0x0000, 0x0c00.
    raw[4] = 0x0c00;
    let decoded = layout.decode_registers(&raw, Some(&["i"])).unwrap();
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded["i"], Value::Int(12));

    let all = layout.decode_registers(&raw, None).unwrap();
    assert_eq!(all.len(), 4);
}

#[test]
fn decode_registers_rejects_unknown_names() {
    let layout = layout();
    let raw = vec![0u16; layout.size() as usize];
    assert!(matches!(
        layout.decode_registers(&raw, Some(&["nope"])),
        Err(Error::VariableNotFound(_))
    ));
}

#[test]
fn decode_registers_rejects_short_readout() {
    let layout = layout();
    let raw = vec![0u16; layout.size() as usize - 1];
    assert!(matches!(
        layout.decode_registers(&raw, None),
        Err(Error::Encoding(_))
    ));
}

#[test]
fn load_from_record_form() {
    let data = serde_json::json!({
        "variables": [
            {"name": "str", "type": "str", "length": 5, "address": 2},
            {"name": "i", "type": "i32"},
            {
                "name": "struct",
                "type": "struct",
                "fields": [
                    {"name": "CHANGED", "format": "u1"},
                    {"name": "ELEMENT_TYPE", "format": "u7"},
                    {"name": "ELEMENT_ID", "format": "u5"},
                ],
                "address": 19,
            },
            {"name": "f", "type": "f16"},
        ],
        "byteorder": "<",
        "wordorder": ">",
    });
    let record: RegisterLayoutRecord = serde_json::from_value(data).unwrap();
    assert_eq!(RegisterLayout::load(&record).unwrap(), layout());
}

#[test]
fn load_defaults_to_big_orders() {
    let data = serde_json::json!({
        "variables": [{"name": "a", "type": "u16"}],
    });
    let record: RegisterLayoutRecord = serde_json::from_value(data).unwrap();
    let loaded = RegisterLayout::load(&record).unwrap();
    let built =
        RegisterLayout::new(vec![Variable::number("a", "u16", None).unwrap()]).unwrap();
    assert_eq!(loaded, built);
}

#[test]
fn dump_then_load_round_trips() {
    let layout = layout();
    assert_eq!(RegisterLayout::load(&layout.dump()).unwrap(), layout);
}

#[test]
fn record_too_wide_is_rejected() {
    let result = Variable::record(
        "s",
        vec![
            Field::new("a", "u16").unwrap(),
            Field::new("b", "u1").unwrap(),
        ],
        None,
    );
    assert!(matches!(result, Err(Error::Encoding(_))));
}
