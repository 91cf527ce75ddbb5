use std::io::{self, Write};
use std::path::Path;

use clap::{Parser, Subcommand};
use reqwest::Method;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront_client::api;
use storefront_client::auth::RequestOptions;
use storefront_client::config::Config;
use storefront_client::error::GatewayError;
use storefront_client::ClientContext;

#[derive(Parser)]
#[command(name = "storefront", about = "Food delivery platform client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in and persist the access token.
    Login {
        #[arg(long)]
        email: String,
    },
    /// End the session here and on the server.
    Logout,
    /// Show the signed-in user, refreshing an expired access token with the
    /// session cookie saved at login.
    Whoami,
    /// Authenticated GET against the API, printing the response body.
    Get { path: String },
}

#[tokio::main]
async fn main() {
    // Load .env if present; variables may also come from the environment.
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    tracing::debug!(api_url = %config.api_url, "storefront configured");

    let ctx = match ClientContext::open(config).await {
        Ok(ctx) => ctx,
        Err(e) => fail(&format!("failed to build HTTP client: {e}")),
    };

    let result = run(&ctx, cli.command).await;
    ctx.save_cookies().await;

    if let Err(err) = result {
        if err.requires_login() {
            fail(&format!("{err}. Run `storefront login --email <address>`."));
        }
        fail(&err.to_string());
    }
}

async fn run(ctx: &ClientContext, command: Command) -> Result<(), GatewayError> {
    match command {
        Command::Login { email } => {
            print!("Password: ");
            io::stdout().flush().ok();
            let password = match rpassword::read_password() {
                Ok(password) => password,
                Err(e) => fail(&format!("failed to read password: {e}")),
            };
            let user = ctx.session.sign_in(&email, &password).await?;
            println!("Signed in as {} <{}> ({:?})", user.name, user.email, user.role);
        }
        Command::Logout => {
            ctx.session.sign_out().await;
            println!("Signed out.");
        }
        Command::Whoami => match ctx.session.restore().await {
            Some(user) => {
                println!("{} <{}> ({:?})", user.name, user.email, user.role);
                if user.role.is_back_office() {
                    println!("Back office access enabled.");
                }
            }
            None => return Err(GatewayError::Unauthenticated),
        },
        Command::Get { path } => {
            let resp = ctx
                .gateway
                .request(Method::GET, &path, RequestOptions::new())
                .await?;
            let resp = api::ensure_success(resp).await?;
            let body = resp.text().await?;
            match serde_json::from_str::<serde_json::Value>(&body) {
                Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
                Err(_) => println!("{body}"),
            }
        }
    }
    Ok(())
}

fn fail(message: &str) -> ! {
    eprintln!("error: {message}");
    std::process::exit(1);
}
