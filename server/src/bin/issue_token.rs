use color_eyre::eyre::{eyre, Result, WrapErr as _};
use skillswap::auth::JwtConfig;
use uuid::Uuid;

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let mut args = std::env::args().skip(1);
    let user_id = args
        .next()
        .ok_or_else(|| eyre!("Usage: issue-token <user-id> [username]"))?;
    let user_id = user_id
        .parse::<Uuid>()
        .wrap_err_with(|| format!("Not a valid user id: {user_id}"))?;
    let username = args.next().unwrap_or_else(|| "dev".to_string());

    // Signs with JWT_SECRET / JWT_TTL_HOURS, same as the server
    let jwt = JwtConfig::from_env()?;
    let token = jwt.issue(user_id, &username)?;

    println!("Token for {username} ({user_id}):");
    println!();
    println!("{token}");
    println!();
    println!("Send it as a bearer token, for example:");
    println!("curl -H \"Authorization: Bearer {token}\" http://localhost:3000/user/me");

    Ok(())
}
