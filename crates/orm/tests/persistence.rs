use std::rc::Rc;

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use proptest_derive::Arbitrary;
use time::macros::datetime;
use time::PrimitiveDateTime;

use stout_orm::*;

#[derive(Arbitrary, Clone, Copy, Debug, Default, Eq, PartialEq, PersistentEnum)]
enum Status {
    #[default]
    Active,
    #[stout(rename = "DONE")]
    Done,
    Archived,
}

fn item_join_tables() -> Vec<JoinTable> {
    vec![JoinTable::new("item_tags", "tag_id", "item_id")]
}

fn tag_join_tables() -> Vec<JoinTable> {
    vec![JoinTable::new("item_tags", "item_id", "tag_id")]
}

#[derive(Clone, Debug, Default, PartialEq, Entity)]
#[stout(table_name = "items", join_tables = "item_join_tables")]
struct Item {
    #[stout(primary_key, autoincrement)]
    id: i64,
    #[stout(nullable = false)]
    name: String,
    price: Option<f64>,
    in_stock: bool,
    #[stout(enumerated = "string")]
    status: Option<Status>,
    #[stout(column = "stage", enumerated = "ordinal")]
    stage_status: Status,
    created: Option<PrimitiveDateTime>,
    #[stout(updatable = false)]
    sku: Option<String>,
    #[stout(transient)]
    scratch: String,
}

#[derive(Clone, Debug, Default, PartialEq, Entity)]
#[stout(join_tables = "tag_join_tables")]
struct Tag {
    #[stout(primary_key, autoincrement)]
    id: i64,
    #[stout(unique, nullable = false)]
    label: String,
}

#[derive(Clone, Debug, Default, PartialEq, Entity)]
#[stout(table_name = "tickets")]
struct Ticket {
    #[stout(primary_key, autoincrement)]
    id: i16,
    note: String,
}

fn manager(dir: &tempfile::TempDir) -> PersistenceManager {
    stout_logging::log_for_tests();

    let mut unit = PersistenceUnit::new("main", "test");
    unit.add_mapped_entity("Item");
    unit.add_mapped_entity("Tag");
    unit.add_mapped_entity("Ticket");
    let ctx = PersistenceContext::new(
        PersistenceProperties::new(vec![unit]).unwrap(),
        &[
            MappedType::of::<Item>(),
            MappedType::of::<Tag>(),
            MappedType::of::<Ticket>(),
        ],
        dir.path(),
    )
    .unwrap();
    ctx.manager("main").unwrap()
}

fn pen() -> Item {
    Item {
        name: "pen".into(),
        price: Some(1.25),
        in_stock: true,
        status: Some(Status::Done),
        stage_status: Status::Done,
        created: Some(datetime!(2014-03-09 17:05:59)),
        sku: Some("P-1".into()),
        ..Default::default()
    }
}

#[test]
fn create_table_statement() {
    let dir = tempfile::TempDir::new().unwrap();
    let m = manager(&dir);
    let d = m.registry().lookup_type::<Item>().unwrap();
    assert_eq!(
        d.create_table_statement().unwrap(),
        "CREATE TABLE IF NOT EXISTS items (id INTEGER PRIMARY KEY AUTOINCREMENT,name TEXT NOT NULL,price REAL,\
         in_stock INTEGER,status TEXT,stage INTEGER,created TEXT,sku TEXT)"
    );
    assert!(d.field("scratch").is_err());
}

#[test]
fn persist_assigns_keys() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut m = manager(&dir);

    let mut a = pen();
    m.persist(&mut a).unwrap();
    assert_eq!(a.id, 1);
    let mut b = pen();
    m.persist(&mut b).unwrap();
    assert_eq!(b.id, 2);

    // An explicit key is kept.
    let mut c = Item {
        id: 10,
        ..pen()
    };
    m.persist(&mut c).unwrap();
    assert_eq!(c.id, 10);
}

#[test]
fn key_too_wide_for_the_field_undoes_the_insert() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut m = manager(&dir);
    m.exec_sql("INSERT INTO tickets (id, note) VALUES (32767, 'last')")
        .unwrap();

    // sqlite hands out 32768, which an i16 key cannot hold.
    let mut t = Ticket {
        note: "next".into(),
        ..Default::default()
    };
    assert!(matches!(
        m.persist(&mut t),
        Err(Error::Conversion(ConversionError::OutOfRange { .. }))
    ));
    assert_eq!(t.id, 0);

    let mut c = m.raw_query("SELECT count(*) FROM tickets").unwrap();
    c.move_to_first();
    assert_eq!(c.get_integer(0).unwrap(), Some(1));
}

#[test]
fn find_round_trips() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut m = manager(&dir);

    let mut a = pen();
    a.scratch = "not stored".into();
    m.persist(&mut a).unwrap();

    let found = m.find::<Item>(a.id).unwrap().unwrap();
    let found = found.borrow().clone();
    assert_eq!(
        found,
        Item {
            scratch: String::new(),
            ..a.clone()
        }
    );
    assert!(m.find::<Item>(99i64).unwrap().is_none());
}

#[test]
fn enums_are_stored_by_mode() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut m = manager(&dir);
    m.persist(&mut pen()).unwrap();

    let mut c = m
        .raw_query("SELECT status, stage, in_stock, created FROM items")
        .unwrap();
    assert!(c.move_to_first());
    assert_eq!(c.get_value(0).unwrap(), &StorageValue::Text("DONE".into()));
    assert_eq!(c.get_value(1).unwrap(), &StorageValue::Integer(1));
    assert_eq!(c.get_value(2).unwrap(), &StorageValue::Integer(1));
    assert_eq!(
        c.get_value(3).unwrap(),
        &StorageValue::Text("2014-03-09 17:05:59".into())
    );
}

#[test]
fn bad_stored_values_fail_the_read() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut m = manager(&dir);
    m.persist(&mut pen()).unwrap();
    m.exec_sql("UPDATE items SET stage = 7").unwrap();
    assert!(matches!(
        m.find_all::<Item>(),
        Err(Error::Conversion(ConversionError::OrdinalOutOfRange { .. }))
    ));

    m.exec_sql("UPDATE items SET stage = 0, created = 'yesterday'")
        .unwrap();
    assert!(matches!(
        m.find_all::<Item>(),
        Err(Error::Conversion(ConversionError::MalformedDateTime { .. }))
    ));
}

#[test]
fn identity_within_a_transaction() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut m = manager(&dir);
    let mut a = pen();
    m.persist(&mut a).unwrap();

    m.start_transaction().unwrap();
    let first = m.find::<Item>(a.id).unwrap().unwrap();
    let second = m.find::<Item>(a.id).unwrap().unwrap();
    assert!(Rc::ptr_eq(&first, &second));
    let all = m.find_all::<Item>().unwrap();
    assert!(Rc::ptr_eq(&first, &all[0]));
    assert!(Rc::ptr_eq(
        &first,
        &m.cached::<Item>(a.id).unwrap().unwrap()
    ));
    assert!(Rc::ptr_eq(
        &first,
        &m.cached_by_field::<Item>("name", FieldValue::Text("pen".into()))
            .unwrap()
            .unwrap()
    ));
    m.end_transaction(true).unwrap();

    assert!(m.adapter().cache().is_empty());
    let third = m.find::<Item>(a.id).unwrap().unwrap();
    assert!(!Rc::ptr_eq(&first, &third));
}

#[test]
fn separate_operations_do_not_share_instances() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut m = manager(&dir);
    let mut a = pen();
    m.persist(&mut a).unwrap();

    let first = m.find::<Item>(a.id).unwrap().unwrap();
    let second = m.find::<Item>(a.id).unwrap().unwrap();
    assert!(!Rc::ptr_eq(&first, &second));
    assert!(m
        .cached_by_field::<Item>("name", FieldValue::Text("pen".into()))
        .unwrap()
        .is_none());
}

#[test]
fn merge_and_remove() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut m = manager(&dir);
    let mut a = pen();
    m.persist(&mut a).unwrap();

    a.name = "fountain pen".into();
    a.status = None;
    a.sku = Some("changed".into());
    assert_eq!(m.merge(&a).unwrap(), 1);

    let found = m.find::<Item>(a.id).unwrap().unwrap();
    assert_eq!(found.borrow().name, "fountain pen");
    assert_eq!(found.borrow().status, None);
    // Not updatable.
    assert_eq!(found.borrow().sku.as_deref(), Some("P-1"));

    assert_eq!(m.remove(&a).unwrap(), 1);
    assert_eq!(m.remove(&a).unwrap(), 0);
    assert!(m.find::<Item>(a.id).unwrap().is_none());
}

#[test]
fn nested_rollback() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut m = manager(&dir);

    m.start_transaction().unwrap();
    m.persist(&mut pen()).unwrap();
    assert!(m.exec_sql("THIS IS NOT SQL").is_err());
    // The failed statement already marked the transaction for rollback.
    m.end_transaction(true).unwrap();
    assert!(m.find_all::<Item>().unwrap().is_empty());

    m.start_transaction().unwrap();
    m.persist(&mut pen()).unwrap();
    m.end_transaction(false).unwrap();
    assert!(m.find_all::<Item>().unwrap().is_empty());

    m.start_transaction().unwrap();
    m.persist(&mut pen()).unwrap();
    m.persist(&mut pen()).unwrap();
    m.end_transaction(true).unwrap();
    assert_eq!(m.find_all::<Item>().unwrap().len(), 2);
}

#[test]
fn queries() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut m = manager(&dir);
    for (name, in_stock) in [("a", true), ("b", false), ("c", true)] {
        m.persist(&mut Item {
            name: name.into(),
            in_stock,
            ..Default::default()
        })
        .unwrap();
    }

    let names = |items: Vec<Managed<Item>>| {
        items
            .iter()
            .map(|i| i.borrow().name.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(names(m.query_list::<Item>("in_stock = 1").unwrap()), ["a", "c"]);
    assert_eq!(names(m.find_all::<Item>().unwrap()), ["a", "b", "c"]);
    assert_eq!(names(m.query_list::<Item>("").unwrap()), ["a", "b", "c"]);

    let b = m.query_single::<Item>("name = 'b'").unwrap().unwrap();
    assert!(!b.borrow().in_stock);
    assert!(m.query_single::<Item>("name = 'z'").unwrap().is_none());
    assert!(matches!(
        m.query_single::<Item>("  "),
        Err(Error::QueryUsage(QueryUsageError::EmptyWhereClause { .. }))
    ));
    assert!(matches!(
        m.query_single::<Item>("in_stock = 1"),
        Err(Error::QueryUsage(QueryUsageError::MultipleResults { count: 2, .. }))
    ));

    // Columns the query leaves out keep their defaults.
    let partial = m
        .raw_query_list::<Item>("SELECT id, name FROM items WHERE name <> 'a' ORDER BY name DESC")
        .unwrap();
    assert_eq!(names(partial.clone()), ["c", "b"]);
    assert!(!partial[0].borrow().in_stock);

    let single = m
        .raw_query_single::<Item>("SELECT * FROM items WHERE id = 1")
        .unwrap()
        .unwrap();
    assert_eq!(single.borrow().name, "a");

    let c = m.raw_query("SELECT count(*) AS n FROM items").unwrap();
    assert_eq!(c.count(), 1);
    assert_eq!(c.column_names(), ["n".to_string()]);
}

#[test]
fn join_tables() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut m = manager(&dir);

    let mut item = pen();
    m.persist(&mut item).unwrap();
    let mut tags = vec![];
    for label in ["red", "blue", "green"] {
        let mut tag = Tag {
            label: label.into(),
            ..Default::default()
        };
        m.persist(&mut tag).unwrap();
        tags.push(tag);
    }

    m.link("item_tags", item.id, &tags[0]).unwrap();
    m.link("item_tags", item.id, &tags[2]).unwrap();

    let linked = m.query_join_table::<Tag>("item_tags", item.id).unwrap();
    let labels = linked
        .iter()
        .map(|t| t.borrow().label.clone())
        .collect::<Vec<_>>();
    assert_eq!(labels, ["red", "green"]);

    // The other direction, through the item's declaration of the same table.
    let items = m.query_join_table::<Item>("item_tags", tags[2].id).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].borrow().name, "pen");

    assert!(m.unlink("item_tags", item.id, &tags[0]).unwrap());
    assert!(!m.unlink("item_tags", item.id, &tags[0]).unwrap());
    assert_eq!(m.query_join_table::<Tag>("item_tags", item.id).unwrap().len(), 1);

    assert!(matches!(
        m.query_join_table::<Tag>("nope", item.id),
        Err(Error::Lookup(LookupError::JoinTableNotFound { .. }))
    ));
}

#[test]
fn unique_constraint() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut m = manager(&dir);
    let mut a = Tag {
        label: "x".into(),
        ..Default::default()
    };
    m.persist(&mut a).unwrap();
    let mut b = Tag {
        label: "x".into(),
        ..Default::default()
    };
    assert!(matches!(m.persist(&mut b), Err(Error::Storage(_))));
    assert_eq!(b.id, 0);
}

#[test]
fn survives_reopening() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut a = pen();
    manager(&dir).persist(&mut a).unwrap();

    let mut m = manager(&dir);
    assert_eq!(m.find_all::<Item>().unwrap().len(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn values_survive_storage(
        name in "[a-zA-Z0-9 ']{1,20}",
        price in proptest::option::of(-1e9f64..1e9f64),
        in_stock: bool,
        status in proptest::option::of(any::<Status>()),
        stage_status: Status,
        seconds in 0i64..4_102_444_800i64,
    ) {
        let dir = tempfile::TempDir::new().unwrap();
        let mut m = manager(&dir);
        let instant = time::OffsetDateTime::from_unix_timestamp(seconds).unwrap();

        let mut item = Item {
            name,
            price,
            in_stock,
            status,
            stage_status,
            created: Some(PrimitiveDateTime::new(instant.date(), instant.time())),
            ..Default::default()
        };
        m.persist(&mut item).unwrap();
        let found = m.find::<Item>(item.id).unwrap().unwrap();
        prop_assert_eq!(&*found.borrow(), &item);
    }
}
