// src/main.rs

pub mod config;
pub mod dashboard;
pub mod db;
pub mod error;
pub mod keys;
pub mod menu;
pub mod staging;
pub mod table;

use std::{io, path::PathBuf};

use anyhow::{bail, Context};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
//
use crate::{
    config::Config,
    dashboard::{
        chart,
        dataset::Dataset,
        filters::Filters,
        report::{self, ReportKind},
        Analysis,
    },
    db::{Connector, DB},
    menu::{Console, Session},
};

#[derive(Parser, Debug)]
#[command(name = "tiendita", version, about = "Editor de datos de la tienda, sincronización con PostgreSQL y tablero de ventas")]
struct Cli {
    /// Directorio de staging (reemplaza BASE_AUXILIAR)
    #[arg(long, global = true)]
    aux_dir: Option<PathBuf>,

    /// Nombre de la base de datos (reemplaza DB_NAME)
    #[arg(long, global = true)]
    db_name: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Editor interactivo de tablas (por defecto)
    Edit,
    /// Copia los csv originales al directorio de staging
    Seed,
    /// Sincroniza todas las tablas de staging con PostgreSQL
    Sync,
    /// Prueba la conexión con PostgreSQL
    Check,
    /// Muestra KPIs y gráficos
    Dashboard {
        #[command(flatten)]
        filters: FilterArgs,
        /// Guarda además los gráficos en JSON
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// Genera un reporte Excel en el directorio de reportes
    Report {
        #[arg(value_enum)]
        kind: ReportKind,
        /// Nombre del archivo, se agrega `.xlsx` si falta
        #[arg(long)]
        name: Option<String>,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Lista los reportes más recientes
    Reports {
        /// Elimina primero este reporte
        #[arg(long)]
        delete: Option<String>,
    },
}

#[derive(Args, Debug)]
struct FilterArgs {
    #[arg(long)]
    from: Option<NaiveDate>,
    #[arg(long)]
    to: Option<NaiveDate>,
    #[arg(long = "branch")]
    branches: Vec<String>,
    #[arg(long = "province")]
    provinces: Vec<String>,
    #[arg(long = "category")]
    categories: Vec<String>,
}

impl From<FilterArgs> for Filters {
    fn from(args: FilterArgs) -> Self {
        Filters {
            from: args.from,
            to: args.to,
            branches: args.branches.into_iter().collect(),
            provinces: args.provinces.into_iter().collect(),
            categories: args.categories.into_iter().collect(),
        }
    }
}

async fn analyse(config: &Config, filters: FilterArgs) -> anyhow::Result<(Dataset, Analysis)> {
    let dataset = Dataset::load(&config.dashboard_csv)
        .await
        .with_context(|| format!("cargando datos del tablero desde {}", config.dashboard_csv.display()))?;
    let filters = Filters::from(filters);
    let Some(analysis) = Analysis::compute(&dataset, &filters, Local::now().date_naive()) else {
        bail!("no hay facturas para analizar");
    };
    Ok((dataset, analysis))
}

async fn edit(config: Config) -> anyhow::Result<()> {
    let mut tables = staging::load_tables(&config.base_auxiliar).unwrap_or_default();
    if tables.is_empty() {
        let copied = staging::seed_from_original(&config.base_original, &config.base_auxiliar)
            .with_context(|| format!("copiando datos originales desde {}", config.base_original.display()))?;
        tracing::info!(?copied, "staging area seeded");
        tables = staging::load_tables(&config.base_auxiliar)?;
    }
    if tables.is_empty() {
        bail!("no se encontraron tablas en {}", config.base_auxiliar.display());
    }

    println!("EDITOR DE TABLAS");
    println!("Tablas cargadas desde staging: {:?}", tables.keys().collect::<Vec<_>>());

    let stdin = io::stdin();
    let console = Console::new(stdin.lock(), io::stdout());
    let staging = config.base_auxiliar.clone();
    let mut session = Session::new(console, staging, tables, Connector::new(config));
    session.run().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::new();
    if let Some(dir) = cli.aux_dir {
        config.base_auxiliar = dir;
    }
    if let Some(database) = cli.db_name {
        config.database = database;
    }

    match cli.command.unwrap_or(Command::Edit) {
        Command::Edit => edit(config).await?,
        Command::Seed => {
            let copied = staging::seed_from_original(&config.base_original, &config.base_auxiliar)?;
            println!("Copiadas {} tablas a {}: {:?}", copied.len(), config.base_auxiliar.display(), copied);
        }
        Command::Sync => {
            let tables = staging::load_tables(&config.base_auxiliar)?;
            let db = DB::new(&config).await.context("conectando a postgres")?;
            let report = db.sync_all(&tables).await;
            db.close().await;
            print!("{}", report.render());
        }
        Command::Check => {
            let db = DB::new(&config).await.context("conectando a postgres")?;
            let info = db.check().await?;
            db.close().await;
            println!("Versión de PostgreSQL: {}", info.version);
            println!("Tablas disponibles: {:?}", info.tables);
        }
        Command::Dashboard { filters, json } => {
            let (dataset, analysis) = analyse(&config, filters).await?;
            println!("Sucursales: {:?}", dataset.branches());
            println!("Provincias: {:?}", dataset.provinces());
            println!("Rubros: {:?}", dataset.categories());
            println!();
            println!("{}", analysis.render_kpis());

            let charts = chart::charts(&analysis);
            for chart in &charts {
                println!("{}", chart.render(40));
            }
            println!("{}", analysis.render_summary());

            if let Some(path) = json {
                chart::write_json(&path, &charts)?;
                println!("Gráficos guardados en {}", path.display());
            }
        }
        Command::Report { kind, name, filters } => {
            let (_, analysis) = analyse(&config, filters).await?;
            let name = name.unwrap_or_else(|| report::default_name(kind, Local::now().naive_local()));
            let path = report::save_report(&config.reports_dir, &name, kind, &analysis)?;
            println!("{} guardado en {}", kind.title(), path.display());
        }
        Command::Reports { delete } => {
            if let Some(name) = delete {
                let path = report::delete_report(&config.reports_dir, &name)?;
                println!("Eliminado {}", path.display());
            }
            let recent = report::recent_reports(&config.reports_dir, 5)?;
            if recent.is_empty() {
                println!("No hay reportes guardados en {}", config.reports_dir.display());
            }
            for saved in recent {
                println!("{:<40} {:>8.1} KB  {}", saved.name, saved.size_kb, saved.modified.format("%d/%m/%Y %H:%M"));
            }
        }
    }

    Ok(())
}
