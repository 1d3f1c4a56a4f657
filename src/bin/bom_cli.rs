use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use stateset_bom::{
    config,
    models::{AssociationType, BomTree, ExpansionType, ProductFeature, ProductionRequest, SourceOrderRef},
    repositories::InMemoryBomRepository,
    services::{
        quantity_aggregator::{self, BreakdownLine, QuantityMap},
        BomService, BuildTreeRequest, ManufacturingOrderOutcome, ManufacturingOrderRequest,
        ManufacturingOrderService,
    },
};
use tracing::debug;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let engine_config = config::load_config().context("failed to load engine configuration")?;
    config::init_tracing(engine_config.log_level(), engine_config.log_json);

    let repository = Arc::new(
        InMemoryBomRepository::from_path(&cli.fixture)
            .with_context(|| format!("failed to load fixture {}", cli.fixture.display()))?,
    );
    let bom = Arc::new(BomService::new(
        repository.clone(),
        repository.clone(),
        repository.clone(),
        engine_config,
    ));
    debug!(fixture = %cli.fixture.display(), "Fixture loaded");

    match cli.command {
        Commands::Explode(args) => handle_explode(&bom, args, cli.json)?,
        Commands::Implode(args) => handle_implode(&bom, args, cli.json)?,
        Commands::Rollup(args) => handle_rollup(&bom, args, cli.json)?,
        Commands::Unconfigured(args) => handle_unconfigured(&bom, args, cli.json)?,
        Commands::PlanOrders(args) => handle_plan_orders(bom, repository, args, cli.json)?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(
    name = "bom-cli",
    about = "Explode, roll up and plan bills of materials from a JSON fixture",
    version
)]
struct Cli {
    #[arg(long, help = "JSON fixture holding products, associations and rules")]
    fixture: PathBuf,
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Emit machine-readable JSON output"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the component tree of a product
    Explode(ExplodeArgs),
    /// Print the products that use a product
    Implode(ImplodeArgs),
    /// Total quantity required per component
    Rollup(RollupArgs),
    /// List positions still waiting for a feature selection
    Unconfigured(TreeArgs),
    /// Raise production requests for a product
    PlanOrders(PlanOrdersArgs),
}

#[derive(Args)]
struct TreeArgs {
    #[arg(help = "Product to build the tree for")]
    product_id: String,
    #[arg(long, default_value = "1", help = "Quantity of the top-level product")]
    quantity: Decimal,
    #[arg(
        long = "feature",
        action = ArgAction::Append,
        help = "Selected feature id; repeat for several. Defaults to the standard features"
    )]
    features: Vec<String>,
    #[arg(long, help = "Association type, e.g. MANUF_COMPONENT")]
    bom_type: Option<AssociationType>,
    #[arg(long, help = "As-of date (RFC 3339); defaults to now")]
    as_of: Option<DateTime<Utc>>,
}

impl TreeArgs {
    fn request(&self, expansion: ExpansionType) -> BuildTreeRequest {
        let mut request = BuildTreeRequest::new(self.product_id.clone())
            .quantity(self.quantity)
            .expansion(expansion);
        if !self.features.is_empty() {
            request = request.features(self.features.iter().map(ProductFeature::new).collect());
        }
        if let Some(bom_type) = &self.bom_type {
            request = request.bom_type(bom_type.clone());
        }
        if let Some(as_of) = self.as_of {
            request = request.as_of(as_of);
        }
        request
    }
}

#[derive(Args)]
struct ExplodeArgs {
    #[command(flatten)]
    tree: TreeArgs,
    #[arg(long, action = ArgAction::SetTrue, conflicts_with = "manufacturing", help = "Direct components only")]
    single_level: bool,
    #[arg(long, action = ArgAction::SetTrue, help = "Do not expand stocked components")]
    manufacturing: bool,
    #[arg(long, action = ArgAction::SetTrue, help = "Leave out work-in-progress components")]
    exclude_wips: bool,
}

#[derive(Args)]
struct ImplodeArgs {
    #[arg(help = "Component to look up")]
    product_id: String,
    #[arg(long, help = "Association type, e.g. MANUF_COMPONENT")]
    bom_type: Option<AssociationType>,
    #[arg(long, help = "As-of date (RFC 3339); defaults to now")]
    as_of: Option<DateTime<Utc>>,
}

#[derive(Args)]
struct RollupArgs {
    #[command(flatten)]
    tree: TreeArgs,
    #[arg(long, action = ArgAction::SetTrue, help = "Only components that are bought, not built")]
    purchased_only: bool,
}

#[derive(Args)]
struct PlanOrdersArgs {
    #[command(flatten)]
    tree: TreeArgs,
    #[arg(long, help = "Completion date of the top-level request (RFC 3339)")]
    required_by: DateTime<Utc>,
    #[arg(long, help = "Facility to produce in")]
    facility: Option<String>,
    #[arg(long, help = "Sales order the requests fulfil")]
    order_id: Option<String>,
    #[arg(long, help = "Shipment the requests are linked to")]
    shipment_id: Option<String>,
    #[arg(long, help = "Routing of the top-level request")]
    routing: Option<String>,
    #[arg(long, action = ArgAction::SetTrue, help = "Treat supplied components as manufactured")]
    ignore_supplier_products: bool,
    #[arg(long, action = ArgAction::SetTrue, help = "Request the products substitutes replaced")]
    use_original: bool,
}

#[derive(Serialize)]
struct UnconfiguredPosition<'a> {
    product_id: &'a str,
    depth: u32,
}

#[derive(Serialize)]
struct PlanReport {
    outcome: ManufacturingOrderOutcome,
    requests: Vec<ProductionRequest>,
}

fn handle_explode(bom: &BomService, args: ExplodeArgs, json: bool) -> Result<()> {
    let expansion = if args.single_level {
        ExpansionType::ExplosionSingleLevel
    } else if args.manufacturing {
        ExpansionType::ExplosionManufacturing
    } else {
        ExpansionType::Explosion
    };
    let tree = bom
        .build_tree(args.tree.request(expansion))
        .with_context(|| format!("failed to explode {}", args.tree.product_id))?;
    let lines = quantity_aggregator::breakdown(&tree, args.exclude_wips);

    if json {
        print_json(&lines)?;
    } else {
        render_breakdown(&lines);
    }
    Ok(())
}

fn handle_implode(bom: &BomService, args: ImplodeArgs, json: bool) -> Result<()> {
    let mut request = BuildTreeRequest::new(args.product_id.clone())
        .expansion(ExpansionType::Implosion)
        .features(Vec::new());
    if let Some(bom_type) = args.bom_type {
        request = request.bom_type(bom_type);
    }
    if let Some(as_of) = args.as_of {
        request = request.as_of(as_of);
    }
    let tree = bom
        .build_tree(request)
        .with_context(|| format!("failed to implode {}", args.product_id))?;
    let lines = quantity_aggregator::breakdown(&tree, false);

    if json {
        print_json(&lines)?;
    } else {
        render_breakdown(&lines);
    }
    Ok(())
}

fn handle_rollup(bom: &BomService, args: RollupArgs, json: bool) -> Result<()> {
    let tree = bom
        .build_tree(args.tree.request(ExpansionType::Explosion))
        .with_context(|| format!("failed to explode {}", args.tree.product_id))?;
    let totals: QuantityMap = if args.purchased_only {
        bom.components_to_purchase(&tree)
            .context("failed to classify components")?
    } else {
        quantity_aggregator::sum_quantities(&tree).context("failed to roll up quantities")?
    };

    if json {
        print_json(&totals.values().collect::<Vec<_>>())?;
    } else {
        for component in totals.values() {
            println!(
                "{:<24} {:>12} ({} position{})",
                component.product_id,
                component.quantity.normalize(),
                component.occurrences,
                if component.occurrences == 1 { "" } else { "s" }
            );
        }
    }
    Ok(())
}

fn handle_unconfigured(bom: &BomService, args: TreeArgs, json: bool) -> Result<()> {
    let tree = bom
        .build_tree(args.request(ExpansionType::Explosion))
        .with_context(|| format!("failed to explode {}", args.product_id))?;
    let positions = unconfigured_positions(&tree);

    if json {
        print_json(&positions)?;
    } else if positions.is_empty() {
        println!("All positions of {} are configured", args.product_id);
    } else {
        for position in &positions {
            println!("- {} (level {})", position.product_id, position.depth);
        }
    }
    Ok(())
}

fn unconfigured_positions(tree: &BomTree) -> Vec<UnconfiguredPosition<'_>> {
    tree.unconfigured_nodes()
        .into_iter()
        .filter_map(|id| tree.node(id))
        .map(|node| UnconfiguredPosition {
            product_id: node.product_id(),
            depth: node.depth,
        })
        .collect()
}

fn handle_plan_orders(
    bom: Arc<BomService>,
    repository: Arc<InMemoryBomRepository>,
    args: PlanOrdersArgs,
    json: bool,
) -> Result<()> {
    let tree = bom
        .build_tree(args.tree.request(ExpansionType::Explosion))
        .with_context(|| format!("failed to explode {}", args.tree.product_id))?;

    let mut request = ManufacturingOrderRequest::new(args.required_by)
        .use_substitute(!args.use_original)
        .ignore_supplier_products(args.ignore_supplier_products);
    if let Some(facility) = args.facility {
        request = request.facility(facility);
    }
    if let Some(order_id) = args.order_id {
        request = request.for_order(SourceOrderRef::new(order_id));
    }
    if let Some(shipment_id) = args.shipment_id {
        request = request.for_shipment(shipment_id);
    }
    if let Some(routing) = args.routing {
        request = request.routing(routing);
    }

    let service = ManufacturingOrderService::new(
        bom,
        repository.clone(),
        repository.clone(),
        repository.clone(),
    );
    let outcome = service
        .create_manufacturing_orders(&tree, &request)
        .context("failed to create production requests")?;
    let report = PlanReport {
        outcome,
        requests: repository.production_requests(),
    };

    if json {
        print_json(&report)?;
    } else {
        println!(
            "{} production request(s), start {} end {}",
            report.requests.len(),
            report.outcome.start_date.to_rfc3339(),
            report.outcome.end_date.to_rfc3339()
        );
        for created in &report.requests {
            let request = &created.request;
            println!(
                "- {} • {} x {} • {} → {} • facility {}",
                created.id,
                request.product_id,
                request.quantity.normalize(),
                request.start_date.to_rfc3339(),
                request.end_date.to_rfc3339(),
                request.facility_id
            );
        }
    }
    Ok(())
}

fn render_breakdown(lines: &[BreakdownLine]) {
    for line in lines {
        println!(
            "{:indent$}{} x {}{}",
            "",
            line.product_id,
            line.quantity.normalize(),
            if line.is_virtual { " (virtual)" } else { "" },
            indent = line.depth as usize * 2
        );
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
