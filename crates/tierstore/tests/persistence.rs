use std::sync::Arc;

use tempfile::TempDir;
use tierstore::{Error, Lookup, Mutation, Persistence, QuerySignature, Record, RecordStore, Value};

fn insert(namespace: &str, record: Record) -> Mutation {
    Mutation::Insert {
        namespace: namespace.to_string(),
        record,
    }
}

fn by_id(namespace: &str, statement: &str, id: i64) -> QuerySignature {
    QuerySignature::new(namespace, statement, vec![Value::Int(id)])
}

#[test]
fn statements_resolve_through_the_trait() {
    let dir = TempDir::new().unwrap();
    let store = RecordStore::open(dir.path()).unwrap();
    store.map_statement("emp", "getById", Lookup::ById);
    store.map_statement("emp", "byName", Lookup::ByField("name".to_string()));

    let alice = Record::new().with("id", 1).with("name", "Alice");
    assert_eq!(store.execute(&insert("emp", alice.clone())).unwrap(), 1);

    assert_eq!(store.fetch(&by_id("emp", "getById", 1)).unwrap(), Some(alice.clone()));
    let named = QuerySignature::new("emp", "byName", vec![Value::from("Alice")]);
    assert_eq!(store.fetch(&named).unwrap(), Some(alice));

    // a miss is a value, not an error
    assert_eq!(store.fetch(&by_id("emp", "getById", 9)).unwrap(), None);
    assert!(matches!(
        store.fetch(&by_id("emp", "nope", 1)),
        Err(Error::UnknownStatement { .. })
    ));
}

#[test]
fn mutations_survive_reopen() {
    let dir = TempDir::new().unwrap();

    {
        let store = RecordStore::open(dir.path()).unwrap();
        for (id, name) in [(1, "Alice"), (2, "Bob"), (3, "Carol")] {
            store
                .execute(&insert("emp", Record::new().with("id", id).with("name", name)))
                .unwrap();
        }
        store
            .execute(&insert("dept", Record::new().with("id", 1).with("deptName", "Ops")))
            .unwrap();

        let renamed = Mutation::Update {
            namespace: "emp".to_string(),
            record: Record::new().with("id", 2).with("name", "Robert"),
        };
        assert_eq!(store.execute(&renamed).unwrap(), 1);
        let gone = Mutation::Delete {
            namespace: "emp".to_string(),
            id: 3,
        };
        assert_eq!(store.execute(&gone).unwrap(), 1);
        store.close().unwrap();
    }

    let store = RecordStore::open(dir.path()).unwrap();
    store.map_statement("emp", "getById", Lookup::ById);
    store.map_statement("dept", "getDept", Lookup::ById);

    let bob = store.fetch(&by_id("emp", "getById", 2)).unwrap().unwrap();
    assert_eq!(bob.get("name").and_then(Value::as_text), Some("Robert"));
    assert_eq!(store.fetch(&by_id("emp", "getById", 3)).unwrap(), None);
    assert_eq!(store.count("emp"), 2);

    let dept = store.fetch(&by_id("dept", "getDept", 1)).unwrap().unwrap();
    assert_eq!(dept.get("deptName").and_then(Value::as_text), Some("Ops"));
}

#[test]
fn shared_handle_is_a_persistence_too() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(RecordStore::open(dir.path()).unwrap());
    store.map_statement("emp", "getById", Lookup::ById);

    fn load<P: Persistence>(p: &P, signature: &QuerySignature) -> Option<Record> {
        p.fetch(signature).unwrap()
    }

    let handle = Arc::clone(&store);
    handle
        .execute(&insert("emp", Record::new().with("id", 4).with("name", "Dan")))
        .unwrap();

    assert_eq!(load(&store, &by_id("emp", "getById", 4)).and_then(|r| r.id()), Some(4));
    assert!(matches!(
        handle.execute(&insert("emp", Record::new().with("id", 4))),
        Err(Error::Duplicate { .. })
    ));
}
