//! Schema Graph Integration Tests
//!
//! Builds the foreign-key graph from a live SQLite catalog and runs the
//! guards against it:
//! - Path search bounded by hops
//! - Join validation verdicts and suggested paths
//! - Guard reports on real schema tables

use query_cascade_core::{QueryDatabase, SchemaGraph};
use query_cascade_guards::{GuardKind, GuardPipeline};

use crate::support::chinook;

async fn live_graph() -> SchemaGraph {
    let snapshot = chinook().get_schema().await.unwrap();
    SchemaGraph::from_snapshot(&snapshot)
}

#[tokio::test]
async fn test_graph_mirrors_catalog() {
    let graph = live_graph().await;
    assert_eq!(graph.tables(), vec!["Album", "Artist", "Genre", "Track"]);
    assert_eq!(graph.edges().len(), 3);
    assert_eq!(graph.edges_for("Track").len(), 2);
    assert_eq!(graph.edges_for("album").len(), 2);
}

#[tokio::test]
async fn test_three_hop_path() {
    let graph = live_graph().await;
    let path = graph.find_path("Artist", "Genre", 3).unwrap();
    assert_eq!(path.describe(), "Artist -> Album -> Track -> Genre");
    assert_eq!(path.hops(), 3);
    assert_eq!(
        path.join_conditions(),
        vec![
            "Album.ArtistId = Artist.ArtistId",
            "Track.AlbumId = Album.AlbumId",
            "Track.GenreId = Genre.GenreId",
        ]
    );

    assert!(graph.find_path("Artist", "Genre", 2).is_none());
}

#[tokio::test]
async fn test_path_to_self() {
    let graph = live_graph().await;
    let path = graph.find_path("track", "Track", 0).unwrap();
    assert_eq!(path.hops(), 0);
    assert_eq!(path.tables, vec!["Track"]);
}

#[tokio::test]
async fn test_validate_join_verdicts() {
    let graph = live_graph().await;

    let direct = graph.validate_join("Album", "ArtistId", "Artist", "ArtistId");
    assert!(direct.valid);
    let reversed = graph.validate_join("artist", "artistid", "ALBUM", "ARTISTID");
    assert!(reversed.valid);

    let skipped = graph.validate_join("Track", "AlbumId", "Artist", "ArtistId");
    assert!(!skipped.valid);
    let path = skipped.suggested_path.unwrap();
    assert_eq!(path.intermediates(), &["Album".to_string()]);

    let wrong_columns = graph.validate_join("Track", "TrackId", "Genre", "GenreId");
    assert!(!wrong_columns.valid);
    assert!(wrong_columns
        .diagnostic
        .contains("join on Track.GenreId = Genre.GenreId"));

    let unknown = graph.validate_join("Track", "InvoiceId", "Invoice", "InvoiceId");
    assert!(!unknown.valid);
    assert_eq!(unknown.diagnostic, "Unknown table 'Invoice'");
}

#[tokio::test]
async fn test_guards_on_live_schema() {
    let graph = live_graph().await;
    let guards = GuardPipeline::default();

    let report = guards.run(
        "SELECT g.Name, COUNT(t.TrackId) AS Tracks FROM Genre g \
         JOIN Track t ON t.GenreId = g.GenreId GROUP BY g.Name LIMIT 25",
        &graph,
    );
    assert!(report.passed);

    let report = guards.run(
        "SELECT ar.Name FROM Artist ar JOIN Genre g ON g.GenreId = ar.ArtistId LIMIT 5",
        &graph,
    );
    assert!(!report.passed);
    assert_eq!(report.failed_guard(), Some(GuardKind::Join));
    let violation = report.violations().next().unwrap();
    assert_eq!(
        violation.suggestion.as_deref(),
        Some("Genre -> Track -> Album -> Artist")
    );
}
