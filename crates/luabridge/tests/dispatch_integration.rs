//! Integration tests for call/index dispatch
//!
//! Tests cover:
//! - Property-style access auto-calling functions
//! - Forced calls and method calls
//! - Multi-return flattening versus explicit calls
//! - Errors when calling non-callable values

use luabridge::{Error, State, Type, Value};

const SETUP: &str = r#"
    str = "a"
    function uniret() return 1 end
    function uniret2(a) return a end
    function multiret() return 1, 2, 3 end
    function multiret2(a, b) return 1, a, b end
    function noret() end

    t = {}
    t.str = "a"
    t.uniret = uniret
    t.uniret2 = uniret2
    t.multiret = multiret
    t.multiret2 = multiret2
"#;

fn none() -> Vec<Value> {
    Vec::new()
}

fn setup() -> State {
    let lua = State::new().unwrap();
    lua.eval(SETUP).unwrap();
    lua
}

#[test]
fn test_property_access() {
    let lua = setup();
    let t = lua.get("t").unwrap().into_table().unwrap();

    assert_eq!(lua.property("str").unwrap(), Value::from("a"));
    assert_eq!(t.property("str").unwrap(), Value::from("a"));
    assert_eq!(lua.send("str", none()).unwrap(), Value::from("a"));

    // a plain get never calls
    assert_eq!(lua.get("uniret").unwrap().type_of(), Type::Function);

    // property access on a niladic function behaves like calling it
    assert_eq!(lua.property("uniret").unwrap(), Value::from(1));
    assert_eq!(lua.invoke("uniret", none()).unwrap(), Value::from(1));
    assert_eq!(t.property("uniret").unwrap(), Value::from(1));
    assert_eq!(lua.send("uniret_", none()).unwrap(), Value::from(1));
    assert_eq!(lua.top(), 0);
}

#[test]
fn test_calls_with_arguments() {
    let lua = setup();
    let t = lua.get("t").unwrap().into_table().unwrap();

    assert_eq!(lua.invoke("uniret2", [2]).unwrap(), Value::from(2));
    assert_eq!(t.invoke("uniret2", [2]).unwrap(), Value::from(2));
    assert_eq!(lua.send("uniret2", vec![Value::from(2)]).unwrap(), Value::from(2));
    assert_eq!(t.send("uniret2", vec![Value::from(2)]).unwrap(), Value::from(2));
    assert_eq!(lua.top(), 0);
}

#[test]
fn test_multiple_returns() {
    let lua = setup();
    let t = lua.get("t").unwrap().into_table().unwrap();
    let expected = Value::array([1, 2, 3]);

    assert_eq!(lua.property("multiret").unwrap(), expected);
    assert_eq!(lua.invoke("multiret", none()).unwrap(), expected);
    assert_eq!(t.property("multiret").unwrap(), expected);
    assert_eq!(t.invoke("multiret", none()).unwrap(), expected);

    let expected = Value::array([1, 5, 6]);
    assert_eq!(lua.invoke("multiret2", [5, 6]).unwrap(), expected);
    assert_eq!(t.invoke("multiret2", [5, 6]).unwrap(), expected);
    assert_eq!(
        lua.send("multiret2", vec![Value::from(5), Value::from(6)]).unwrap(),
        expected
    );

    // no results flatten to an empty array
    assert_eq!(lua.property("noret").unwrap(), Value::Array(Vec::new()));
    assert_eq!(lua.top(), 0);
}

#[test]
fn test_explicit_call_keeps_every_result() {
    let lua = setup();

    let uniret = lua.get("uniret").unwrap();
    let uniret = uniret.as_ref_object().unwrap();
    let results = uniret.call(none()).unwrap();
    assert_eq!(results, vec![lua.property("uniret").unwrap()]);

    let multiret2 = lua.get("multiret2").unwrap();
    let results = multiret2.as_ref_object().unwrap().call([5, 6]).unwrap();
    assert_eq!(results, vec![Value::from(1), Value::from(5), Value::from(6)]);

    let noret = lua.get("noret").unwrap();
    assert!(noret.as_ref_object().unwrap().call(none()).unwrap().is_empty());
    assert_eq!(lua.top(), 0);
}

#[test]
fn test_calling_non_callables() {
    let lua = setup();

    let err = lua.send("str_", none()).unwrap_err();
    assert!(matches!(err, Error::Runtime(ref m) if m.contains("str") && m.contains("string")));

    let err = lua.send("str!", none()).unwrap_err();
    assert!(matches!(err, Error::Runtime(_)));

    let err = lua.send("str", vec![Value::from(2)]).unwrap_err();
    assert!(matches!(err, Error::Runtime(_)));

    let err = lua.invoke("missing", none()).unwrap_err();
    assert!(matches!(err, Error::Runtime(ref m) if m.contains("nil")));

    let t = lua.get("t").unwrap();
    let err = t.as_ref_object().unwrap().call(none()).unwrap_err();
    assert!(matches!(err, Error::Runtime(_)));

    // functions are not indexable
    let f = lua.get("uniret").unwrap();
    let err = f.as_ref_object().unwrap().get("x").unwrap_err();
    assert!(matches!(err, Error::Runtime(_)));
    assert_eq!(lua.top(), 0);
}

#[test]
fn test_script_errors_propagate() {
    let lua = setup();
    lua.eval("function boom(x) error('bad ' .. tostring(x)) end").unwrap();

    let err = lua.invoke("boom", [9]).unwrap_err();
    assert!(matches!(err, Error::Runtime(ref m) if m.contains("bad 9")));

    // wrong-shaped arguments are the callee's own error
    let err = lua.invoke("tostring", none()).unwrap_err();
    assert!(matches!(err, Error::Runtime(ref m) if m.contains("bad argument")));
    assert_eq!(lua.top(), 0);
}

#[test]
fn test_classes() {
    let lua = State::new().unwrap();
    lua.eval(
        r#"
        Account = {
            balance = 0,
            deposit = function(self, v)
                self.balance = self.balance + v
            end,
        }
        "#,
    )
    .unwrap();

    let account = lua.get("Account").unwrap().into_table().unwrap();
    assert_eq!(account.property("balance").unwrap(), Value::from(0));

    account.call_method("deposit", [100]).unwrap();
    assert_eq!(account.property("balance").unwrap(), Value::from(100));

    account.send("deposit!", vec![Value::from(50)]).unwrap();
    assert_eq!(account.get("balance").unwrap(), Value::from(150));
    assert_eq!(lua.top(), 0);
}

#[test]
fn test_userdata_methods() {
    let lua = State::new().unwrap();
    let out = lua.eval("return io.output()").unwrap();
    let out = out.as_ref_object().unwrap();

    assert_eq!(out.type_of(), Type::Userdata);
    // userdata index through its metatable
    assert_eq!(out.get("write").unwrap().type_of(), Type::Function);
    assert!(matches!(out.set("x", 1), Err(Error::Runtime(_))));
    assert_eq!(lua.top(), 0);
}
