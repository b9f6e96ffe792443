//! Integration tests for tables created and read from the host
//!
//! Tests cover:
//! - Setters on the globals and on nested tables
//! - Tables built from host literals
//! - Length, sequence and mapping views
//! - Full and integer-prefix iteration

use luabridge::{MappingPolicy, State, Table, Type, Value};

fn table(lua: &State, name: &str) -> Table {
    lua.get(name).unwrap().into_table().unwrap()
}

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|v| Value::from(*v)).collect()
}

#[test]
fn test_setters() {
    let lua = State::new().unwrap();

    lua.set("v", 5).unwrap();
    assert_eq!(lua.get("v").unwrap(), Value::from(5));

    lua.set("a", Value::Map(Vec::new())).unwrap();
    let a = table(&lua, "a");
    assert_eq!(a.type_of(), Type::Table);
    assert_eq!(a.set("v", 7).unwrap(), Value::from(7));
    assert_eq!(a.get("v").unwrap(), Value::from(7));

    lua.send("b=", vec![Value::from(6)]).unwrap();
    assert_eq!(lua.send("b", Vec::new()).unwrap(), Value::from(6));
    a.send("b=", vec![Value::from(7)]).unwrap();
    assert_eq!(a.property("b").unwrap(), Value::from(7));

    assert_eq!(lua.eval("return a.v + b").unwrap(), Value::from(13));
    assert_eq!(lua.top(), 0);
}

#[test]
fn test_table_creation_from_host() {
    let lua = State::new().unwrap();

    lua.set("seq", Value::array([10, 20, 30])).unwrap();
    assert_eq!(lua.eval("return #seq").unwrap(), Value::from(3));
    assert_eq!(lua.eval("return seq[2]").unwrap(), Value::from(20));

    lua.set(
        "cfg",
        Value::map([
            (Value::from("name"), Value::from("bridge")),
            (Value::from("sizes"), Value::array([1, 2])),
            (Value::from(true), Value::from("yes")),
        ]),
    )
    .unwrap();
    assert_eq!(lua.eval("return cfg.name").unwrap(), Value::from("bridge"));
    assert_eq!(lua.eval("return cfg.sizes[2]").unwrap(), Value::from(2));
    assert_eq!(lua.eval("return cfg[true]").unwrap(), Value::from("yes"));

    let created = lua.create_table().unwrap();
    assert_eq!(created.length().unwrap(), 0);

    let nested = lua.new_table_at("nested").unwrap();
    nested.set("x", 1).unwrap();
    assert_eq!(lua.eval("return nested.x").unwrap(), Value::from(1));
    assert_eq!(lua.top(), 0);
}

#[test]
fn test_table_access() {
    let lua = State::new().unwrap();
    lua.eval(
        r#"
        array = { 100, 200, 300, 400 }
        hsh = { a = 1, b = 2, [10] = 3 }
        mixed = { 'x', 'y', k = 'v' }
        "#,
    )
    .unwrap();

    let array = table(&lua, "array");
    assert_eq!(array.length().unwrap(), 4);
    assert_eq!(array.to_sequence().unwrap(), ints(&[100, 200, 300, 400]));
    assert_eq!(array.get(1).unwrap(), Value::from(100));
    assert!(array.get(5).unwrap().is_nil());

    // non-sequence keys only: length is zero although entries exist
    let hsh = table(&lua, "hsh");
    assert_eq!(hsh.length().unwrap(), 0);
    assert!(hsh.to_sequence().unwrap().is_empty());
    assert_eq!(hsh.to_mapping().unwrap().len(), 3);

    let mixed = table(&lua, "mixed");
    assert_eq!(mixed.to_mapping().unwrap().len(), 3);
    assert_eq!(
        mixed.to_mapping_with(MappingPolicy::ExcludeSequence).unwrap(),
        vec![(Value::from("k"), Value::from("v"))]
    );
    assert_eq!(lua.top(), 0);
}

#[test]
fn test_array_iteration() {
    let lua = State::new().unwrap();
    lua.eval("array = { 100, 200, 300, 400 }").unwrap();
    let array = table(&lua, "array");

    let mut n = 0;
    for entry in array.ipairs() {
        let (k, v) = entry.unwrap();
        n += 1;
        assert_eq!(k, n);
        assert_eq!(v, Value::from(n * 100));
    }
    assert_eq!(n, 4);

    let keys: Vec<i64> = array.ikeys().map(Result::unwrap).collect();
    assert_eq!(keys.iter().sum::<i64>(), 10);

    let values: Vec<Value> = array.ivalues().map(Result::unwrap).collect();
    assert_eq!(values, ints(&[100, 200, 300, 400]));

    // full iteration over a pure sequence visits the same entries
    let mut sum_k = 0;
    let mut sum_v = 0;
    for entry in array.pairs() {
        let (k, v) = entry.unwrap();
        sum_k += k.as_integer().unwrap();
        sum_v += v.as_integer().unwrap();
    }
    assert_eq!((sum_k, sum_v), (10, 1000));
    assert_eq!(lua.top(), 0);
}

#[test]
fn test_hash_iteration() {
    let lua = State::new().unwrap();
    lua.eval("hsh = { [1]=100, [2]=200, a=300, b=400, }").unwrap();
    let hsh = table(&lua, "hsh");

    let expected = [
        (Value::from(1), Value::from(100)),
        (Value::from(2), Value::from(200)),
        (Value::from("a"), Value::from(300)),
        (Value::from("b"), Value::from(400)),
    ];

    let mut n = 0;
    for entry in hsh.pairs() {
        let pair = entry.unwrap();
        assert!(expected.contains(&pair), "unexpected pair {:?}", pair);
        n += 1;
    }
    assert_eq!(n, 4);

    let keys: Vec<Value> = hsh.keys().map(Result::unwrap).collect();
    assert_eq!(keys.len(), 4);
    for (k, _) in &expected {
        assert!(keys.contains(k));
    }

    let sum: i64 = hsh
        .values()
        .map(|v| v.unwrap().as_integer().unwrap())
        .sum();
    assert_eq!(sum, 1000);

    assert_eq!(hsh.ipairs().count(), 2);
    assert_eq!(lua.top(), 0);
}

#[test]
fn test_iteration_interleaves_with_other_calls() {
    let lua = State::new().unwrap();
    lua.eval("t = { a = 1, b = 2, c = 3 } seen = 0").unwrap();
    let t = table(&lua, "t");

    for entry in t.pairs() {
        let (k, _) = entry.unwrap();
        // assigning to existing fields during traversal is allowed
        t.set(k, 0).unwrap();
        lua.eval("seen = seen + 1").unwrap();
    }
    assert_eq!(lua.get("seen").unwrap(), Value::from(3));
    assert!(t.values().all(|v| v.unwrap() == Value::from(0)));
    assert_eq!(lua.top(), 0);
}

#[test]
fn test_clearing_fields_during_iteration() {
    let lua = State::new().unwrap();

    // short keys are interned by the VM, long keys are not
    for key_len in [1, 60] {
        lua.eval(&format!(
            "t = {{}} for i = 1, 20 do t[string.rep('k', {}) .. i] = i end",
            key_len
        ))
        .unwrap();
        let t = table(&lua, "t");

        let mut visited = 0;
        for entry in t.pairs() {
            let (k, _) = entry.unwrap();
            t.set(k, Value::Nil).unwrap();
            lua.eval("collectgarbage()").unwrap();
            visited += 1;
        }
        assert_eq!(visited, 20, "key length {}", key_len);
        assert_eq!(t.pairs().count(), 0);
        assert_eq!(lua.live_handles(), 1);
    }
    assert_eq!(lua.top(), 0);
}

#[test]
fn test_globals_view() {
    let lua = State::new().unwrap();
    lua.set("marker", "here").unwrap();
    let globals = lua.globals().unwrap();
    assert_eq!(globals.get("marker").unwrap(), Value::from("here"));

    let found = globals
        .keys()
        .map(Result::unwrap)
        .any(|k| k == Value::from("marker"));
    assert!(found);
    assert_eq!(lua.top(), 0);
}
