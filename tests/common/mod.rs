#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use rustmemorm::prelude::*;
use rustmemorm::storage::MemoryMapper;
use rustmemorm::{WireReader, WireWriter};
use std::sync::Arc;

pub const INVOICE: i32 = 40;
pub const INVOICE_LINE: i32 = 41;
pub const CUSTOMER: i32 = 42;

domain_type! {
    #[derive(Debug)]
    pub struct Invoice(INVOICE, Identity) {
        number: String,
        issued: DateTime<Utc>,
        total: Decimal,
        customer: Reference<Customer>,
    }
    relations {
        lines: Relation<Invoice, InvoiceLine> = invoice_lines,
    }
}

domain_type! {
    #[derive(Debug)]
    pub struct InvoiceLine(INVOICE_LINE, Identity) {
        invoice: Reference<Invoice>,
        product: String,
        quantity: i32,
        unit_price: Decimal,
    }
}

domain_type! {
    #[derive(Debug)]
    pub struct Customer(CUSTOMER, CustomerKey) {
        name: String,
        tags: Vec<String>,
        credit_limit: Option<Decimal>,
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
            let store = owner.context().resource::<MemoryStore>()?;
            store.load_children(owner, line_invoice)
        },
        line_invoice_mut,
    )
}

/// Region plus running number. Regions are stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CustomerKey {
    pub region: String,
    pub number: i32,
}

impl CustomerKey {
    pub fn new(region: &str, number: i32) -> Self {
        Self {
            region: region.to_string(),
            number,
        }
    }
}

impl Key for CustomerKey {
    fn generate() -> Self {
        let number = (Identity::new().value().as_u128() % 1_000_000) as i32;
        Self::new("EU", number)
    }

    fn encode(&self, writer: &mut WireWriter<'_>) -> Result<()> {
        writer.write_string(&self.region)?;
        writer.write_i32(self.number)
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        let region = reader.read_string()?;
        let number = reader.read_i32()?;
        Ok(Self { region, number })
    }

    fn is_null(&self) -> bool {
        self.region.is_empty()
    }
}

/// Normalizes the region of a looked-up key before reading the row.
pub struct CustomerMapper {
    rows: MemoryMapper<Customer>,
}

impl DataMapper<Customer> for CustomerMapper {
    fn insert(&self, entity: &Entity<Customer>) -> Result<()> {
        self.rows.insert(entity)
    }

    fn select(&self, entity: &Entity<Customer>) -> Result<()> {
        let key = entity.key();
        let stored = CustomerKey::new(&key.region.to_uppercase(), key.number);
        if stored != key {
            entity.sync_key(stored)?;
        }
        self.rows.select(entity)
    }

    fn update(&self, entity: &Entity<Customer>) -> Result<()> {
        self.rows.update(entity)
    }

    fn delete(&self, entity: &Entity<Customer>) -> Result<()> {
        self.rows.delete(entity)
    }
}

pub struct Fixture {
    pub context: Context,
    pub store: Arc<MemoryStore>,
}

pub fn fixture() -> Fixture {
    fixture_with(ContextConfig::new("billing"))
}

pub fn fixture_with(config: ContextConfig) -> Fixture {
    let store = MemoryStore::new();
    let customers = store.clone();
    let context = Context::builder(config)
        .register_with_mapper::<Invoice, _>(store.factory::<Invoice>())
        .register_with_mapper::<InvoiceLine, _>(store.factory::<InvoiceLine>())
        .register_with_mapper::<Customer, _>(move |_config: &ContextConfig| {
            Ok(Arc::new(CustomerMapper {
                rows: MemoryMapper::new(customers.clone()),
            }) as Arc<dyn DataMapper<Customer>>)
        })
        .resource(store.clone())
        .build()
        .unwrap();
    Fixture { context, store }
}

pub fn issued_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()
}

pub fn money(cents: i128) -> Decimal {
    Decimal::new(cents, 2).unwrap()
}

/// A saved invoice with the given line products, each saved with it.
pub fn saved_invoice(context: &Context, number: &str, products: &[&str]) -> Arc<Entity<Invoice>> {
    let invoice = context.create::<Invoice>().unwrap();
    invoice.set_number(number.to_string()).unwrap();
    invoice.set_issued(issued_at()).unwrap();
    invoice.set_total(money(1999)).unwrap();
    for (i, product) in products.iter().enumerate() {
        let line = invoice.lines().add().unwrap();
        line.set_product(product.to_string()).unwrap();
        line.set_quantity(i as i32 + 1).unwrap();
        line.set_unit_price(money(500)).unwrap();
    }
    invoice.save().unwrap();
    invoice
}
