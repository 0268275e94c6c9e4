use mbmap::coils::{self, CoilLayout};
use mbmap::error::Error;
use mbmap::registers::{RegisterLayout, Variable};
use mbmap::{ServerContextLayout, SlaveContextLayout, SubSpace};
use std::collections::BTreeMap;

fn layout() -> ServerContextLayout {
    ServerContextLayout::new(BTreeMap::from([
        (
            0,
            SlaveContextLayout {
                holding_registers: Some(
                    RegisterLayout::new(vec![Variable::number("setpoint", "f32", None).unwrap()])
                        .unwrap(),
                ),
                coils: Some(
                    CoilLayout::new(vec![coils::Variable::new("enable", 1, None).unwrap()])
                        .unwrap(),
                ),
                ..Default::default()
            },
        ),
        (
            5,
            SlaveContextLayout {
                input_registers: Some(
                    RegisterLayout::new(vec![Variable::number("level", "u16", None).unwrap()])
                        .unwrap(),
                ),
                discrete_inputs: Some(
                    CoilLayout::new(vec![coils::Variable::new("alarm", 1, None).unwrap()])
                        .unwrap(),
                ),
                ..Default::default()
            },
        ),
    ]))
}

#[test]
fn find_locates_unit_and_sub_space() {
    let layout = layout();
    assert_eq!(layout.find("setpoint").unwrap(), (0, SubSpace::HoldingRegisters));
    assert_eq!(layout.find("enable").unwrap(), (0, SubSpace::Coils));
    assert_eq!(layout.find("level").unwrap(), (5, SubSpace::InputRegisters));
    assert_eq!(layout.find("alarm").unwrap(), (5, SubSpace::DiscreteInputs));
    assert!(matches!(
        layout.find("nope"),
        Err(Error::VariableNotFound(_))
    ));
}

#[test]
fn locate_searches_one_unit() {
    let layout = layout();
    assert_eq!(layout.locate("alarm", 5).unwrap(), SubSpace::DiscreteInputs);
    assert!(matches!(
        layout.locate("alarm", 0),
        Err(Error::VariableNotFound(_))
    ));
    assert!(matches!(
        layout.locate("alarm", 9),
        Err(Error::NoSuchSlaveLayout(9))
    ));
}

#[test]
fn sub_layout_lookups() {
    let layout = layout();
    assert!(layout.holding_register_layout(0).is_ok());
    assert!(matches!(
        layout.input_register_layout(0),
        Err(Error::MissingSubLayout {
            unit: 0,
            space: SubSpace::InputRegisters,
        })
    ));
    assert!(matches!(
        layout.coil_layout(5),
        Err(Error::MissingSubLayout { .. })
    ));
    assert!(matches!(
        layout.discrete_input_layout(1),
        Err(Error::NoSuchSlaveLayout(1))
    ));
}

#[test]
fn layouts_compare_structurally() {
    assert_eq!(layout(), layout());
}
