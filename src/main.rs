//! Campus Tenancy - multi-tenant school backend.
//!
//! This binary starts the HTTP server and configures all components.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use campus_tenancy::{
    config::{CheckConfig, Cli, Command, RegistryArgs, ServeConfig},
    connection::{CacheSettings, ConnectionCache, SeaOrmConnector},
    error::RegistryError,
    server::{create_shared_router, RouterConfig},
    service::TenantService,
    tenant::{DatabaseRegistry, HostParser, InMemoryRegistry, TenantRegistry, TenantResolver},
};

/// Pool size for the control-plane registry connection.
const REGISTRY_POOL_SIZE: u32 = 4;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Check(config) => run_check(config).await,
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Campus Tenancy v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Base domain: {}", config.base_domain);
    info!("  Reserved labels: {}", config.reserved().collect::<Vec<_>>().join(", "));
    info!(
        "  Timeouts: connect {}ms, acquire {}ms, lookup {}ms",
        config.connect_timeout_ms, config.acquire_timeout_ms, config.lookup_timeout_ms
    );
    info!(
        "  Cache: {} tenants, {} connections/tenant",
        config.max_tenants, config.pool_size
    );
    if config.idle_timeout_secs > 0 {
        info!("  Idle timeout: {}s", config.idle_timeout_secs);
    }

    let registry = match open_registry(&config.registry).await {
        Ok(registry) => registry,
        Err(e) => {
            error!("Failed to open tenant registry: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let parser = HostParser::with_reserved(&config.base_domain, config.reserved());
    let resolver = TenantResolver::with_lookup_timeout(parser, registry, config.lookup_timeout());

    let settings = config.cache_settings();
    let connector = SeaOrmConnector::new()
        .with_pool_size(config.pool_size)
        .with_connect_timeout(settings.connect_timeout)
        .with_sqlx_logging(config.verbose);
    let cache = ConnectionCache::with_settings(connector, settings);

    let service = Arc::new(TenantService::new(resolver, cache));

    let watcher = service.spawn_watcher(config.registry_poll_interval());
    if watcher.is_none() {
        warn!("Registry polling disabled; status changes apply only to new connections");
    }
    let sweeper = service.cache().spawn_idle_sweeper();

    let router_config = RouterConfig::new().with_tracing(!config.no_tracing);
    let router = create_shared_router(Arc::clone(&service), router_config);

    let addr = config.bind_address();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    info!("");
    info!("  Server listening on: http://{}", addr);
    info!("  Try: curl -H 'Host: <school>.{}' http://{}/tenant", config.base_domain, addr);
    info!("");

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("Shutting down, closing tenant connections");
    service.close_all().await;
    for handle in [watcher, sweeper].into_iter().flatten() {
        handle.abort();
    }

    if let Err(e) = served {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Open the registry named by the flags.
async fn open_registry(args: &RegistryArgs) -> Result<Arc<dyn TenantRegistry>, RegistryError> {
    match (&args.registry_file, &args.registry_url) {
        (Some(path), _) => {
            let registry = InMemoryRegistry::from_json_file(path).await?;
            info!(
                "  Registry: {} ({} tenants)",
                path.display(),
                registry.len().await
            );
            Ok(Arc::new(registry))
        }
        (None, Some(url)) => {
            let registry = DatabaseRegistry::connect(url, REGISTRY_POOL_SIZE).await?;
            info!("  Registry: control-plane database");
            Ok(Arc::new(registry))
        }
        (None, None) => Err(RegistryError::InvalidData(
            "no registry source configured".to_string(),
        )),
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "campus_tenancy=debug,tower_http=debug,sqlx=info"
    } else {
        "campus_tenancy=info,tower_http=info,sqlx=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

// =============================================================================
// Check Command
// =============================================================================

async fn run_check(config: CheckConfig) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    println!("Campus Tenancy Tenant Check");
    println!("═══════════════════════════");
    println!();

    if let Err(e) = config.validate() {
        println!("✗ Configuration: {}", e);
        return ExitCode::FAILURE;
    }

    let registry = match open_registry(&config.registry).await {
        Ok(registry) => {
            println!("✓ Registry opened");
            registry
        }
        Err(e) => {
            println!("✗ Registry: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let parser = HostParser::with_reserved(&config.base_domain, config.reserved());
    let resolver = TenantResolver::new(parser, registry);

    let descriptor = match resolver.resolve(&config.tenant_host).await {
        Ok(descriptor) => {
            println!("✓ Tenant: {} ({})", descriptor.slug(), descriptor.status());
            println!("  Database: {}", descriptor.connection_target().redacted_url());
            descriptor
        }
        Err(e) => {
            println!("✗ {}: {}", config.tenant_host, e);
            return ExitCode::FAILURE;
        }
    };

    if !config.connect {
        return ExitCode::SUCCESS;
    }

    print!("Connecting to tenant database... ");

    let timeout = Duration::from_millis(config.connect_timeout_ms.max(1));
    let settings = CacheSettings::default()
        .with_connect_timeout(timeout)
        .with_acquire_timeout(timeout);
    let cache = ConnectionCache::with_settings(
        SeaOrmConnector::new().with_pool_size(1).with_connect_timeout(timeout),
        settings,
    );

    let outcome = match cache.acquire(&descriptor).await {
        Ok(facade) => match facade.ping().await {
            Ok(()) => {
                println!("✓ success ({:?})", facade.backend());
                ExitCode::SUCCESS
            }
            Err(e) => {
                println!("✗ ping failed");
                println!();
                println!("Error: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            println!("✗ failed");
            println!();
            println!("Error: {}", e);
            println!();
            println!("Please check:");
            println!("  - The tenant's database server is reachable");
            println!("  - The credentials stored in the registry are current");
            ExitCode::FAILURE
        }
    };

    cache.close_all().await;
    outcome
}
