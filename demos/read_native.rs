use potree_stream::prelude::*;
use potree_stream::resource::file::FileClient;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "assets/heidentor".to_string());
    let url = format!("file://{}", path);

    let point_cloud =
        PotreePointCloud::from_url(&url, ResourceLoader::new(FileClient), PotreeConfig::default())
            .await?;
    println!(
        "{}: {} points, encoding {}",
        url,
        point_cloud.metadata().points,
        point_cloud.encoding()
    );

    point_cloud.load_entire_hierarchy().await?;
    let snapshot = point_cloud.hierarchy_snapshot();
    let depth = snapshot.iter().map(|node| node.level).max().unwrap_or(0);
    println!("Entire hierarchy: {} nodes, depth {}", snapshot.iter().count(), depth);

    for node_id in std::iter::once(point_cloud.root_id()).chain(point_cloud.children(point_cloud.root_id())) {
        let points = point_cloud.load(node_id).await?;
        let node = point_cloud.node_snapshot(node_id).ok_or("node vanished")?;
        println!(
            "node r{}: {} points, density {}, attributes {:?}",
            node.name,
            points.num_points,
            points.density,
            points.buffers.keys().collect::<Vec<_>>()
        );
    }

    Ok(())
}
