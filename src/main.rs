use std::{process, sync::Arc};

use pictura::{
    application::{
        compression::CompressionService,
        error::AppError,
        listing::ListingCache,
        lookup::ImageLookup,
        mutations::ImageMutations,
        pagination::ListingQuery,
        repos::ImagesRepo,
    },
    cache::{CacheConfig, QueryStore},
    config::{self, ImagesCommand, ListingArgs},
    infra::{
        error::InfraError,
        http::{self, HttpImagesRepo, HttpState},
        imaging::{ImagesizeDecoder, RasterTransformer},
        telemetry::{self, LogOutput},
    },
};
use pictura_api_types::UpdateImageRequest;
use serde::Serialize;
use serde_json::json;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    match command {
        config::Command::Serve(_) => {
            telemetry::init(&settings.logging, LogOutput::Stdout)?;
            run_serve(settings).await
        }
        config::Command::Images(args) => {
            telemetry::init(&settings.logging, LogOutput::Stderr)?;
            run_images(settings, args.command).await
        }
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let state = HttpState {
        compression: CompressionService::new(
            Arc::new(ImagesizeDecoder),
            Arc::new(RasterTransformer),
        ),
        defaults: settings.compression.clone(),
    };
    let body_limit = usize::try_from(settings.uploads.max_request_bytes.get()).unwrap_or(usize::MAX);
    let router = http::build_router(state, body_limit);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "pictura::serve",
        addr = %settings.server.addr,
        body_limit,
        "Listening"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            let _ = shutdown_rx.await;
        },
    );
    let mut server = tokio::spawn(async move { server.await });

    tokio::select! {
        joined = &mut server => return server_outcome(joined),
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                warn!(target = "pictura::serve", error = %err, "Failed to listen for shutdown signal");
            }
        }
    }

    info!(
        target = "pictura::serve",
        grace_ms = settings.server.graceful_shutdown.as_millis(),
        "Shutting down"
    );
    let _ = shutdown_tx.send(());
    let drained = tokio::time::timeout(settings.server.graceful_shutdown, &mut server).await;
    match drained {
        Ok(joined) => server_outcome(joined),
        Err(_) => {
            warn!(target = "pictura::serve", "Graceful shutdown timed out, aborting connections");
            server.abort();
            Ok(())
        }
    }
}

fn server_outcome(
    joined: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    match joined {
        Ok(result) => result.map_err(|err| AppError::unexpected(format!("server error: {err}"))),
        Err(err) => Err(AppError::unexpected(format!("server task failed: {err}"))),
    }
}

async fn run_images(settings: config::Settings, command: ImagesCommand) -> Result<(), AppError> {
    let repo: Arc<dyn ImagesRepo> = Arc::new(HttpImagesRepo::new(&settings.api)?);
    let cache_config = CacheConfig::from(&settings.cache);
    let store = Arc::new(QueryStore::new(&cache_config));
    let listings = ListingCache::new(repo.clone(), store.clone(), cache_config.clone());
    let lookup = ImageLookup::new(repo.clone(), store.clone(), &cache_config);
    let mutations = ImageMutations::new(repo, store);

    match command {
        ImagesCommand::List { listing, page } => {
            let query = listing_query(&listing, page, &cache_config)?;
            print_json(&listings.get_page(&query).await?)
        }
        ImagesCommand::Scroll { listing, pages } => {
            let filter = listing_query(&listing, 1, &cache_config)?.filter();
            let scroll = listings.infinite(filter);
            let mut view = scroll.load().await?;
            while view.pages.len() < pages && scroll.fetch_next_page().await? {
                view = scroll.view().unwrap_or(view);
            }
            print_json(&json!({
                "pages": view.pages.len(),
                "total": view.total,
                "hasNextPage": view.has_next_page,
                "images": view.images,
            }))
        }
        ImagesCommand::Show { id } => print_json(&lookup.get_detail(&id).await?),
        ImagesCommand::Update {
            id,
            tags,
            expiry_minutes,
        } => {
            let request = UpdateImageRequest {
                tags: (!tags.is_empty()).then_some(tags),
                expiry_minutes,
            };
            print_json(&mutations.update(&id, &request).await?)
        }
        ImagesCommand::Delete { id } => {
            let id = mutations.delete(&id).await?;
            print_json(&json!({ "success": true, "id": id }))
        }
        ImagesCommand::Tags => print_json(&lookup.get_tags().await?),
    }
}

fn listing_query(
    listing: &ListingArgs,
    page: u32,
    cache: &CacheConfig,
) -> Result<ListingQuery, AppError> {
    Ok(ListingQuery::new(
        page,
        listing.limit.unwrap_or(cache.page_size),
        listing.tag.clone(),
        listing.orientation,
    )?)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
