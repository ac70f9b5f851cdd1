//! Walks an invoice through its lifecycle against the in-memory store.
//!
//! ```text
//! RUST_LOG=rustmemorm=debug cargo run --example invoice_demo
//! ```
//!
//! `INVOICE_DEMO_CONFIG` may point at a JSON `ContextConfig`.

use anyhow::Context as _;
use chrono::Utc;
use rustmemorm::prelude::*;
use std::{env, fs, sync::Arc};

domain_type! {
    #[derive(Debug)]
    pub struct Invoice(40, Identity) {
        number: String,
        issued: chrono::DateTime<chrono::Utc>,
        total: Decimal,
    }
    relations {
        lines: Relation<Invoice, InvoiceLine> = invoice_lines,
    }
}

domain_type! {
    #[derive(Debug)]
    pub struct InvoiceLine(41, Identity) {
        invoice: Reference<Invoice>,
        product: String,
        quantity: i32,
        unit_price: Decimal,
    }
}

fn line_invoice(line: &InvoiceLine) -> &Reference<Invoice> {
    &line.invoice
}

fn line_invoice_mut(line: &mut InvoiceLine) -> &mut Reference<Invoice> {
    &mut line.invoice
}

fn invoice_lines(binding: &Binding<Invoice>) -> Relation<Invoice, InvoiceLine> {
    Relation::with_back_reference(
        binding,
        |owner: &Entity<Invoice>| {
            owner
                .context()
                .resource::<MemoryStore>()?
                .load_children(owner, line_invoice)
        },
        line_invoice_mut,
    )
}

fn config_from_env() -> anyhow::Result<ContextConfig> {
    match env::var("INVOICE_DEMO_CONFIG") {
        Ok(path) => {
            let raw = fs::read_to_string(&path).with_context(|| format!("read config '{path}'"))?;
            Ok(ContextConfig::from_json(&raw)?)
        }
        Err(_) => Ok(ContextConfig::new("billing").data_source("memory://billing")),
    }
}

fn build_context(store: &Arc<MemoryStore>) -> anyhow::Result<Context> {
    let context = Context::builder(config_from_env()?)
        .register_with_mapper::<Invoice, _>(store.factory::<Invoice>())
        .register_with_mapper::<InvoiceLine, _>(store.factory::<InvoiceLine>())
        .resource(store.clone())
        .build()?;
    Ok(context)
}

/// Prices are kept in cents (scale 2).
fn total_of(invoice: &Entity<Invoice>) -> anyhow::Result<Decimal> {
    let mut cents = 0i128;
    for line in invoice.lines().items()? {
        cents += line.unit_price()?.mantissa() * i128::from(line.quantity()?);
    }
    Ok(Decimal::new(cents, 2)?)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = MemoryStore::new();
    let context = build_context(&store)?;

    let invoice = context.create::<Invoice>()?;
    invoice.set_number("INV-2024-001".to_string())?;
    invoice.set_issued(Utc::now())?;
    for (product, quantity, cents) in [("keyboard", 2, 4_990), ("monitor", 1, 18_900)] {
        let line = invoice.lines().add()?;
        line.set_product(product.to_string())?;
        line.set_quantity(quantity)?;
        line.set_unit_price(Decimal::new(cents, 2)?)?;
    }
    invoice.set_total(total_of(&invoice)?)?;
    invoice.save()?;
    println!("saved {} ({}) total {}", invoice.number()?, invoice.state(), invoice.total()?);

    // a second code path sees the same instance
    let same = context.get::<Invoice>(invoice.key())?;
    println!("identity map hit: {}", Arc::ptr_eq(&invoice, &same));

    // ship the invoice to another context and back
    let bytes = invoice.to_bytes()?;
    let remote_store = MemoryStore::new();
    let remote = build_context(&remote_store)?;
    let copy = remote
        .decode_entity(&bytes)?
        .context("invoice bytes decoded to null")?
        .downcast::<Invoice>()?;
    println!(
        "{} bytes on the wire, remote copy {} in state {}",
        bytes.len(),
        copy.number()?,
        copy.state()
    );

    // reload from storage through a stub
    let key = invoice.key();
    drop((invoice, same));
    context.clear_identity_map()?;
    let stub = context.get::<Invoice>(key)?;
    println!("stub state {}, lines {}", stub.state(), stub.lines().len()?);
    println!("after access: {} ({})", stub.number()?, stub.state());

    let first = stub.lines().items()?.remove(0);
    stub.lines().remove(&first)?;
    stub.save()?;
    println!("removed {}, {} line(s) stored", first.product()?, store.row_count(41)?);

    stub.kill()?;
    println!(
        "killed: {} invoice(s), {} line(s) stored, {} mapper calls",
        store.row_count(40)?,
        store.row_count(41)?,
        store.journal().len()
    );
    Ok(())
}
