//! Persist a few rows into a database under the system temp directory, then read them back.
use anyhow::Result;
use log::*;

use stout_orm::*;

#[derive(Clone, Copy, Debug, Default, PartialEq, PersistentEnum)]
enum Shelf {
    #[default]
    Front,
    Back,
}

#[derive(Debug, Default, Entity)]
#[stout(table_name = "items")]
struct Item {
    #[stout(primary_key, autoincrement)]
    id: i64,
    #[stout(nullable = false, unique)]
    name: String,
    price: Option<f64>,
    #[stout(enumerated = "string")]
    shelf: Shelf,
}

const PROPERTIES: &str = r#"{
    "persistence_units": [
        {
            "unit_name": "shop",
            "database_name": "stout_demo",
            "mapped_entities": ["Item"]
        }
    ]
}"#;

fn main() -> Result<()> {
    stout_logging::log_to_stderr();

    let properties = PersistenceProperties::from_json_str(PROPERTIES)?;
    let ctx = PersistenceContext::new(properties, &[MappedType::of::<Item>()], std::env::temp_dir())?;
    info!("Database at {}", ctx.database_path("shop")?.display());

    let mut manager = ctx.manager("shop")?;
    manager.exec_sql("DELETE FROM items")?;

    manager.in_transaction(|m| {
        for (name, price, shelf) in [("pen", 1.25, Shelf::Front), ("lamp", 19.0, Shelf::Back)] {
            let mut item = Item {
                name: name.into(),
                price: Some(price),
                shelf,
                ..Default::default()
            };
            m.persist(&mut item)?;
            info!("Stored {} as {}", item.name, item.id);
        }
        Ok(())
    })?;

    for item in manager.query_list::<Item>("shelf = 'Back'")? {
        let item = item.borrow();
        info!("{:?}", item);
    }
    Ok(())
}
