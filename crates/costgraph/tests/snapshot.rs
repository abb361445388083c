//! Snapshot tests
//!
//! Loads each *.tf file in /tests/fixtures/ individually and compares if the
//! resolved references change.

#[test]
fn snapshots() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("COSTGRAPH_LOG"))
        .with_writer(std::io::stderr)
        .try_init();

    let registry = costgraph::resources::registry();

    insta::glob!("fixtures/*.tf", |path| {
        let mut source = costgraph::hcl_source::HclSource::default();
        source.load_file(path).expect("fixture must load");

        let graph = costgraph::graph::resolve(source.plan(), &registry);

        insta::assert_json_snapshot!(graph.address_map());
    });
}
