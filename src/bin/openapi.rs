use anyhow::Result;
use utoipa::OpenApi;

fn main() -> Result<()> {
    let doc = warden::warden::ApiDoc::openapi();
    let json = serde_json::to_string_pretty(&doc)?;
    println!("{json}");
    Ok(())
}
