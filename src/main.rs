use objdb::common::{DatabaseConfig, EntryWidth, PageId, Position};
use objdb::txn::Database;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();

    println!("objdb - an embedded object database index engine");
    println!("=================================================\n");

    let db_path = "demo.odb";
    std::fs::remove_file(db_path).ok();

    let config = DatabaseConfig::default().with_page_size(512);
    let mut db = Database::create(db_path, config.clone()).expect("Failed to create database");
    println!("Created {} with {}-byte pages", db_path, db.page_size());

    // Store a few objects and index their names
    let names = ["ada", "grace", "edsger", "barbara", "donald"];
    let first_oid = {
        let mut tx = db.begin();
        let range = tx
            .allocate_oids(names.len() as u64)
            .expect("Failed to allocate oids");
        let by_name = tx
            .create_index("person.name", true, EntryWidth::Long)
            .expect("Failed to create index");

        for (i, (oid, name)) in range.iter().zip(names).enumerate() {
            let position = Position::new(PageId::new(1000 + i as u32), 64);
            tx.add_oid(oid, position).expect("Failed to add oid");
            tx.index_insert(by_name, name, oid)
                .expect("Failed to index name");
        }

        let tx_id = tx.commit().expect("Failed to commit");
        println!("Committed {} objects in transaction {}", names.len(), tx_id);
        range.start
    };

    // An uncommitted change is invisible after rollback
    {
        let mut tx = db.begin();
        tx.remove_oid(first_oid).expect("Failed to remove oid");
        tx.rollback();
    }

    drop(db);
    let mut db = Database::open(db_path, config).expect("Failed to reopen database");
    let mut snapshot = db.snapshot().expect("Failed to take snapshot");

    println!("\nReopened at transaction {}:", snapshot.tx_id());
    for name in names {
        let oids = snapshot
            .lookup("person.name", name)
            .expect("Failed to look up name");
        for oid in oids {
            let position = snapshot.find_oid(oid).expect("Failed to find oid");
            println!("  - {:<8} {} -> {:?}", name, oid, position);
        }
    }

    let stats = db.statistics().expect("Failed to collect statistics");
    println!("\nDatabase stats:");
    println!("  - Pages in use: {}", stats.high_water_mark);
    println!("  - Free pages: {}", stats.free_pages);
    println!("  - OID index depth: {}", stats.oid_index.depth);

    std::fs::remove_file(db_path).ok();
    println!("\nDemo completed successfully!");
}
