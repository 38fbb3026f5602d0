mod logging;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use delivery_client::{
    ApiError, AuthSession, Config, ProfileUpdate, RequestedRole, RoleRequest, SessionPhase,
    UserProfile,
};
use serde_json::{Map, Value};

#[derive(Parser)]
#[command(name = "delivery-cli")]
#[command(about = "Command line client for the food delivery backend")]
#[command(version)]
struct Cli {
    /// Override the backend base URL (e.g. http://192.168.1.80:8000/api/)
    #[arg(long, env = "API_BASE")]
    api_base: Option<String>,

    /// Enable debug logging
    #[arg(long, short, default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the session
    Login {
        #[arg(long, short)]
        username: String,
        #[arg(long, short, env = "DELIVERY_PASSWORD")]
        password: String,
    },
    /// Clear the stored session and notify the backend
    Logout,
    /// Show the signed-in user
    Whoami {
        /// Fetch the profile from the backend instead of the cache
        #[arg(long)]
        reload: bool,
    },
    /// Update profile fields and optionally upload a new avatar
    UpdateProfile {
        /// Field to change, as key=value (repeatable)
        #[arg(long = "set", value_parser = parse_key_val)]
        fields: Vec<(String, String)>,
        /// Local image file or file:// URI
        #[arg(long)]
        avatar: Option<String>,
    },
    /// Create a new account
    Register {
        #[arg(long, short)]
        username: String,
        #[arg(long, short, env = "DELIVERY_PASSWORD")]
        password: String,
        #[arg(long)]
        email: Option<String>,
        /// Extra form field, as key=value (repeatable)
        #[arg(long = "set", value_parser = parse_key_val)]
        fields: Vec<(String, String)>,
    },
    /// List restaurants
    Restaurants {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        page: Option<u32>,
    },
    /// List foods, optionally of one restaurant or matching a search
    Foods {
        #[arg(long)]
        restaurant: Option<u64>,
        #[arg(long)]
        search: Option<String>,
    },
    /// Show the restaurant owned by the signed-in seller
    MyRestaurant,
    /// Ask to become a shipper or a seller
    RequestRole {
        #[arg(value_enum)]
        role: RoleArg,
        #[arg(long)]
        reason: Option<String>,
        /// Extra detail, as key=value (repeatable)
        #[arg(long = "detail", value_parser = parse_key_val)]
        details: Vec<(String, String)>,
    },
    /// List role requests made by the signed-in user
    MyRequests,
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Shipper,
    Seller,
}

impl From<RoleArg> for RequestedRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Shipper => RequestedRole::Shipper,
            RoleArg::Seller => RequestedRole::Seller,
        }
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{s}`"))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in `{s}`"));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

fn to_map(pairs: Vec<(String, String)>) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect()
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_user(user: &UserProfile) {
    println!("{} {}", "user:".bold(), user.username.green());
    println!("{} {}", "role:".bold(), user.role.as_str());
    if let Some(email) = &user.email {
        println!("{} {}", "email:".bold(), email);
    }
    if let Some(avatar) = &user.avatar {
        println!("{} {}", "avatar:".bold(), avatar.dimmed());
    }
}

/// Session-expired errors also drop the local session.
async fn checked(session: &AuthSession, result: Result<Value, ApiError>) -> anyhow::Result<Value> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_session_expired() => {
            session.handle_auth_error().await;
            Err(anyhow!("{e}"))
        }
        Err(e) => Err(e.into()),
    }
}

/// Rendered confirmation, produced only once the backend accepted the request.
async fn submit_role_request(session: &AuthSession, request: &RoleRequest) -> anyhow::Result<String> {
    let result = session.api().request_role(request).await;
    let created = checked(session, result).await?;
    Ok(format!(
        "{}\n{}",
        "Request submitted".green(),
        serde_json::to_string_pretty(&created)?
    ))
}

async fn require_login(session: &AuthSession) -> anyhow::Result<()> {
    if session.restore().await == SessionPhase::LoggedIn {
        return Ok(());
    }
    Err(anyhow!("Not signed in. Run `delivery-cli login` first."))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.debug);

    let mut config = Config::load();
    if let Some(api_base) = cli.api_base {
        config.api_base = api_base;
    }
    log::debug!("Using API base {}", config.api_base);

    let session = AuthSession::from_config(&config).context("failed to set up the API client")?;

    match cli.command {
        Commands::Login { username, password } => {
            let user = session.login(&username, &password).await?;
            println!("{}", "Signed in".green().bold());
            print_user(&user);
        }
        Commands::Logout => {
            session.logout().await?;
            println!("{}", "Signed out".green());
        }
        Commands::Whoami { reload } => {
            require_login(&session).await?;
            let user = if reload {
                session.reload_profile().await?
            } else {
                session
                    .current_user()
                    .ok_or_else(|| anyhow!("No cached profile"))?
            };
            print_user(&user);
        }
        Commands::UpdateProfile { fields, avatar } => {
            require_login(&session).await?;
            let update = ProfileUpdate {
                fields: to_map(fields),
                avatar,
            };
            let user = session.update_profile(&update).await?;
            println!("{}", "Profile updated".green());
            print_user(&user);
        }
        Commands::Register {
            username,
            password,
            email,
            fields,
        } => {
            let mut form = to_map(fields);
            form.insert("username".into(), Value::String(username));
            form.insert("password".into(), Value::String(password));
            if let Some(email) = email {
                form.insert("email".into(), Value::String(email));
            }
            let created = session.register(&form).await?;
            println!("{}", "Account created".green());
            print_json(&created)?;
        }
        Commands::Restaurants { search, page } => {
            let page = page.map(|p| p.to_string());
            let mut query: Vec<(&str, &str)> = Vec::new();
            if let Some(search) = search.as_deref() {
                query.push(("search", search));
            }
            if let Some(page) = page.as_deref() {
                query.push(("page", page));
            }
            let result = session.api().restaurants(&query).await;
            print_json(&checked(&session, result).await?)?;
        }
        Commands::Foods { restaurant, search } => {
            let result = match (restaurant, search.as_deref()) {
                (_, Some(text)) => session.api().search_foods(text).await,
                (Some(id), None) => session.api().restaurant_foods(id, &[]).await,
                (None, None) => session.api().foods(&[]).await,
            };
            print_json(&checked(&session, result).await?)?;
        }
        Commands::MyRestaurant => {
            require_login(&session).await?;
            let result = session.api().my_restaurant().await;
            print_json(&checked(&session, result).await?)?;
        }
        Commands::RequestRole {
            role,
            reason,
            details,
        } => {
            require_login(&session).await?;
            let request = RoleRequest {
                request_type: role.into(),
                reason,
                details: to_map(details),
            };
            println!("{}", submit_role_request(&session, &request).await?);
        }
        Commands::MyRequests => {
            require_login(&session).await?;
            let result = session.api().my_role_requests().await;
            print_json(&checked(&session, result).await?)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use delivery_client::{ApiClient, MemoryKeyValueStore, SessionStore};

    use super::*;

    #[test]
    fn key_value_arguments() {
        assert_eq!(
            parse_key_val("first_name=Mai Anh").unwrap(),
            ("first_name".to_string(), "Mai Anh".to_string())
        );
        assert_eq!(
            parse_key_val("note=a=b").unwrap(),
            ("note".to_string(), "a=b".to_string())
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn cli_parses_role_request() {
        let cli = Cli::try_parse_from([
            "delivery-cli",
            "request-role",
            "seller",
            "--reason",
            "I cook",
            "--detail",
            "restaurant_name=Pho 24",
        ])
        .unwrap();
        match cli.command {
            Commands::RequestRole { role, details, .. } => {
                assert!(matches!(role, RoleArg::Seller));
                assert_eq!(details.len(), 1);
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[tokio::test]
    async fn failed_role_request_reports_no_submission() {
        let config = Config::with_api_base("http://127.0.0.1:1/api/");
        let store = SessionStore::new(Arc::new(MemoryKeyValueStore::default()));
        let session = AuthSession::new(ApiClient::new(&config, store).unwrap(), &config);
        let request = RoleRequest {
            request_type: RequestedRole::Shipper,
            reason: None,
            details: Map::new(),
        };

        let err = submit_role_request(&session, &request).await.unwrap_err();
        assert!(err.downcast_ref::<ApiError>().is_some_and(ApiError::is_network));
        assert!(!err.to_string().contains("Request submitted"));
    }
}
