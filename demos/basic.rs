use fetch_hook::{append, CachePolicy, Fetch, FetchArgs, Options, Provider, ReqwestTransport};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let provider = Provider::from_env()?;

    let people = Fetch::builder(ReqwestTransport::new())
        .provider(provider)
        .build(
            FetchArgs::config(
                Options::new()
                    .path("/people")
                    .per_page(20)
                    .on_mount(true)
                    .cache_policy(CachePolicy::NoCache)
                    .on_new_data(append)
                    .data(json!([])),
            )
            .with_dependencies(vec![json!(1)]),
        )?;

    people.mount().await?;
    let mut page = 1;
    while people.has_more() {
        page += 1;
        people
            .update(vec![json!(page)], &format!("?page={page}"))
            .await?;
        if let Some(err) = people.error() {
            anyhow::bail!("page {page} failed: {err}");
        }
    }

    for person in people.data().as_array().into_iter().flatten() {
        println!("{person}");
    }

    Ok(())
}
