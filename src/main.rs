use portcullis::config::Config;
use portcullis::serve::StaticFiles;
use portcullis::{Method, Request, Response, Route, Server, ServerOptions, Session, tls};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;

    let mut options = ServerOptions::from_config(&cfg.server);
    if let Some(tls_cfg) = &cfg.tls {
        options = options.with_tls(tls::acceptor_from_pem(&tls_cfg.cert_path, &tls_cfg.key_path)?);
    }

    let server = Server::new(options);
    server.add_routes([
        Route::exact(Method::GET, "/", hello).allow_insecure(true),
        Route::exact(Method::POST, "/echo", echo).allow_insecure(true),
    ]);
    if let Some(files) = &cfg.static_files {
        server.add_routes([StaticFiles::new(&files.mount, &files.root)
            .allow_download(files.allow_download)
            .route()?
            .allow_insecure(true)]);
    }

    let addr = server.start(cfg.server.listen_addr.as_str()).await?;
    tracing::info!(%addr, tls = cfg.tls.is_some(), "Portcullis running");

    tokio::select! {
        exit = server.wait() => {
            tracing::error!(?exit, "Accept loop ended");
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            server.stop();
        }
    }

    Ok(())
}

async fn hello(session: Session, _request: Request) -> anyhow::Result<()> {
    session.send(Response::ok("Hello from Portcullis\n")).commit().await?;
    Ok(())
}

async fn echo(session: Session, request: Request) -> anyhow::Result<()> {
    if request.expects_continue() {
        session.send_continue().await?;
    }
    let request = session.read(request).commit().await?;
    session.send(Response::ok(request.body)).commit().await?;
    Ok(())
}
