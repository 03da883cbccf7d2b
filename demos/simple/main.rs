use std::{collections::HashMap, sync::mpsc, time::Duration};

use target_delivery::{TargetParameters, TargetPrefetch, TargetRequest};

pub fn main() -> target_delivery::Result<()> {
    let client_code = std::env::var("TARGET_CLIENT_CODE").unwrap_or_else(|_| "acme".to_owned());
    let client = target_delivery::ClientConfig::from_client_code(client_code).to_client()?;

    let parameters = TargetParameters::new()
        .with_parameters(HashMap::from([("page".to_owned(), "home".to_owned())]));

    // Prefetch the banner, then wait for it to be cached.
    let (prefetched, prefetch_done) = mpsc::channel();
    client.prefetch_content(
        vec![TargetPrefetch::new("homepage-banner")],
        Some(parameters.clone()),
        move |result| {
            let _ = prefetched.send(result);
        },
    );
    match prefetch_done.recv_timeout(Duration::from_secs(10)) {
        Ok(result) => println!("Prefetch: {:?}", result),
        Err(_) => println!("Prefetch did not complete"),
    }

    // The banner comes from the cache, the hero from the network.
    let (delivered, content) = mpsc::channel();
    let requests = ["homepage-banner", "homepage-hero"]
        .into_iter()
        .map(|name| {
            let delivered = delivered.clone();
            TargetRequest::new(name, "<p>default</p>").with_callback(move |content| {
                let _ = delivered.send(content);
            })
        })
        .collect();
    client.retrieve_location_content(requests, Some(parameters));

    for content in content.iter().take(2) {
        println!(
            "{} ({:?}): {}",
            content.name,
            content.source,
            content.content.to_content_string()
        );
    }

    client.locations_displayed(vec!["homepage-banner".to_owned()], None);
    println!("Session: {}", client.get_session_id()?);

    client.shutdown()
}
