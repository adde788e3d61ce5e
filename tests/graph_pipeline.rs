//! Loading a graph description from disk and writing its output.

use framegraph::graph::{node_ref, LoadedGraph};
use framegraph::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

const GRAPH: &str = r#"{
    "nodes": {
        "src": {
            "filter": "BlankClip",
            "args": { "width": 8, "height": 4, "format": "YUV420P8", "length": 3, "color": [16, 128, 128] }
        },
        "bright": {
            "filter": "Expr",
            "args": { "clips": [{ "node": "src" }], "expr": ["x 2 *"] }
        },
        "luma": {
            "filter": "ShufflePlanes",
            "args": { "clips": [{ "node": "bright" }], "planes": [0], "colorfamily": "gray" }
        }
    },
    "output": "bright"
}"#;

fn load(core: &Core) -> LoadedGraph {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(GRAPH.as_bytes()).unwrap();
    GraphDescription::from_file(file.path())
        .unwrap()
        .build(core)
        .unwrap()
}

#[test]
fn graph_file_builds_named_nodes() {
    let core = Core::with_threads(2).unwrap();
    let loaded = load(&core);
    assert_eq!(
        loaded.nodes.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["src", "bright", "luma"]
    );
    assert_eq!(loaded.output, loaded.nodes["bright"]);

    let frame = loaded.output.get_frame(2).unwrap();
    assert_eq!(frame.plane::<u8>(0).unwrap().get(3, 7), 32);
    assert_eq!(frame.plane::<u8>(1).unwrap().get(1, 3), 255);

    let luma = loaded.nodes["luma"].get_frame(0).unwrap();
    assert_eq!(luma.format().name(), "GRAY8");
    assert_eq!((luma.width(), luma.height()), (8, 4));
}

#[test]
fn topology_of_loaded_graph() {
    let core = Core::with_threads(1).unwrap();
    let loaded = load(&core);
    let graph = NodeGraph::from_output(&loaded.nodes["luma"]);
    assert_eq!(graph.node_count(), 3);
    assert_eq!(graph.depth(), 3);
    let names: Vec<String> = graph
        .dependency_order()
        .iter()
        .map(|n| n.name().to_string())
        .collect();
    assert_eq!(names, vec!["BlankClip", "Expr", "ShufflePlanes"]);
    assert!(graph.to_dot().contains("ShufflePlanes"));
}

#[test]
fn y4m_output_to_file() {
    let core = Core::with_threads(2).unwrap();
    let loaded = load(&core);
    let mut out = NamedTempFile::new().unwrap();
    let options = PipeOptions {
        format: OutputFormat::Y4m,
        requests: 2,
        ..Default::default()
    };
    let summary = pipe_node(&loaded.output, out.as_file_mut(), &options, None).unwrap();

    let header = "YUV4MPEG2 C420 W8 H4 F24:1 Ip A0:0\n";
    let frame_bytes = "FRAME\n".len() + 8 * 4 + 2 * (4 * 2);
    let written = std::fs::read(out.path()).unwrap();
    assert_eq!(summary.frames, 3);
    assert_eq!(written.len(), header.len() + 3 * frame_bytes);
    assert!(written.starts_with(header.as_bytes()));
    assert_eq!(written[header.len() + 6], 32);
}

#[test]
fn config_file_drives_the_core() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "threads = 3\nmax_cache_size_mb = 64\ncache_enabled = false").unwrap();
    let config = CoreConfig::from_file(file.path()).unwrap();
    let core = Core::with_config(config).unwrap();
    assert_eq!(core.num_threads(), 3);
    assert!(!core.config().cache_enabled);
    assert_eq!(core.config().max_cache_size_mb, 64);
}

#[test]
fn descriptions_can_be_built_in_code() {
    let core = Core::with_threads(1).unwrap();
    let description = GraphDescription::new("diff")
        .with_node(
            "a",
            NodeDescription::new("BlankClip")
                .arg("format", "GRAY16")
                .arg("width", 4)
                .arg("height", 4)
                .arg("color", vec![65535]),
        )
        .with_node(
            "b",
            NodeDescription::new("BlankClip")
                .arg("format", "GRAY16")
                .arg("width", 4)
                .arg("height", 4),
        )
        .with_node(
            "diff",
            NodeDescription::new("PlaneDifference").arg("clips", vec![node_ref("a"), node_ref("b")]),
        );
    let json = description.to_json_compact().unwrap();
    let loaded = GraphDescription::from_json(&json).unwrap().build(&core).unwrap();
    let frame = loaded.output.get_frame(0).unwrap();
    let diff = frame.props().get_float("PlaneDifference", 0).unwrap();
    assert!((diff - 1.0).abs() < 1e-9);
}
