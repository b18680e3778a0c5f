use hyper::{server::conn::http1, service};
use hyper_util::rt::TokioIo;
use std::{convert::Infallible, env, net::Ipv4Addr, sync::Arc};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Parse environment variables
    let port: u16 = env::var("PORT")?.parse()?;
    let token = env::var("TOKEN")?;
    let key = env::var("PUB_KEY")?;
    let mut public = [0; 32];
    hex::decode_to_slice(key.as_bytes(), &mut public)?;
    let public = api::VerifyingKey::from_bytes(&public)?;
    let db_url = env::var("DATABASE_URL")?;

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async {
        // Connect to the database and bring the schema up to date
        let config: api::db::Config = db_url.parse()?;
        let (client, connection) = config.connect(api::db::NoTls).await?;
        let connection = tokio::spawn(async move {
            if let Err(err) = connection.await {
                log::error!("database connection error: {err}");
            }
        });
        let database = api::db::Database::from(client);
        database.migrate().await.map_err(|err| anyhow::anyhow!("database migration failed: {err:?}"))?;
        log::info!("database ready");

        let bot = Arc::new(api::Bot::new(database, token));
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
        log::info!("listening on port {port}");

        loop {
            let stream = tokio::select! {
                result = listener.accept() => result?.0,
                _ = tokio::signal::ctrl_c() => break,
            };
            let bot = bot.clone();
            tokio::spawn(async move {
                let service = service::service_fn(move |req| {
                    let bot = bot.clone();
                    async move {
                        let (parts, body) = req.into_parts();
                        let response = match api::try_respond(body, &parts.headers, &public, &bot).await {
                            Ok(response) => response,
                            Err(code) => {
                                let mut response = hyper::Response::new(Default::default());
                                *response.status_mut() = code;
                                response
                            }
                        };
                        Ok::<_, Infallible>(response)
                    }
                });
                if let Err(err) = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await {
                    log::error!("connection error: {err}");
                }
            });
        }

        log::info!("shutting down");
        connection.abort();
        anyhow::Ok(())
    })
}
