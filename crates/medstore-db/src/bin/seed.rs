//! # Seed Data
//!
//! Registers the four reference pharmacies in a fresh database.
//!
//! ## Usage
//! ```bash
//! # Seed ./medical_store.db (default)
//! cargo run -p medstore-db --bin seed
//!
//! # Specify database path
//! cargo run -p medstore-db --bin seed -- --db ./data/central.db
//! ```
//!
//! Stores whose license number already exists are skipped, so running the
//! seed twice is harmless.

use chrono::Utc;
use medstore_core::NewStore;
use medstore_db::{Database, DbConfig, DbError};
use std::env;

/// (name, address, contact, license)
const STORES: &[(&str, &str, &str, &str)] = &[
    ("Michael Medical Store", "123 Main Street, City Center", "+1-555-0123", "MS001"),
    ("Jackson Medical Store", "456 Oak Avenue, Downtown", "+1-555-0124", "MS002"),
    ("Bob Medical Store", "789 Pine Road, Uptown", "+1-555-0125", "MS003"),
    ("Gill Medical Store", "321 Elm Street, Westside", "+1-555-0126", "MS004"),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./medical_store.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("MedStore Seed Data");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./medical_store.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("MedStore Seed Data");
    println!("==================");
    println!("Database: {}", db_path);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let today = Utc::now().date_naive();
    let mut added = 0;

    for (name, address, contact, license) in STORES {
        let store = NewStore {
            store_name: name.to_string(),
            address: address.to_string(),
            contact_number: Some(contact.to_string()),
            license_number: license.to_string(),
            opening_date: Some(today),
        };

        match db.stores().create(&store).await {
            Ok(created) => {
                added += 1;
                println!("  Added store {} ({}) as id {}", name, license, created.id);
            }
            Err(DbError::UniqueViolation { .. }) => {
                println!("  Skipped {} ({}): already registered", name, license);
            }
            Err(e) => eprintln!("Failed to add store {}: {}", name, e),
        }
    }

    println!();
    println!("✓ Seed complete, {} stores added", added);

    db.close().await;
    Ok(())
}
