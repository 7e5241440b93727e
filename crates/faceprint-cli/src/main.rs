use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use faceprint_core::onnx::{ARCFACE_MODEL_FILE, SCRFD_MODEL_FILE};
use faceprint_core::{BackendAdapter, BackendKind, CorpusStore, FaceService, MatchOutcome};
use faceprint_store::SqliteCorpus;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "faceprint", version, about = "Register and verify faces against a local corpus")]
struct Cli {
    /// Corpus database path.
    #[arg(long, env = "FACEPRINT_DB_PATH", global = true)]
    db: Option<PathBuf>,

    /// Directory holding det_10g.onnx and w600k_r50.onnx.
    #[arg(long, env = "FACEPRINT_MODEL_DIR", global = true)]
    model_dir: Option<PathBuf>,

    /// Embedding backend: onnx or pixel.
    #[arg(long, env = "FACEPRINT_BACKEND", default_value = "onnx", global = true)]
    backend: BackendKind,

    /// Cosine similarity needed for a match.
    #[arg(long, env = "FACEPRINT_SIMILARITY_THRESHOLD", default_value_t = 0.40, global = true)]
    threshold: f32,

    /// Print machine-readable JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register the face in an image under a name
    Register {
        /// Name to store the face under
        #[arg(short, long)]
        name: String,
        /// Image file
        image: PathBuf,
    },
    /// Find the best stored match for the face in an image
    Verify {
        /// Image file
        image: PathBuf,
    },
    /// List registered faces
    List,
    /// Decode and describe one stored face
    Inspect {
        /// Record id
        id: i64,
        /// Also print the decoded vector
        #[arg(long)]
        vector: bool,
    },
    /// Show corpus and backend status
    Status {
        /// Load the model to check it works
        #[arg(long)]
        load: bool,
    },
}

/// What a command produced. `success` is false for a verify without a
/// match, which exits with status 1.
struct Report {
    json: Value,
    text: String,
    success: bool,
}

impl Report {
    fn ok(json: Value, text: String) -> Self {
        Self { json, text, success: true }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let service = open_service(&cli)?;
    let report = execute(&cli, &service)?;

    if cli.json {
        println!("{}", report.json);
    } else {
        println!("{}", report.text);
    }
    if !report.success {
        std::process::exit(1);
    }
    Ok(())
}

fn execute(cli: &Cli, service: &FaceService<SqliteCorpus>) -> Result<Report> {
    tracing::debug!(command = ?cli.command, backend = %cli.backend, "running command");

    let report = match &cli.command {
        Commands::Register { name, image } => {
            let bytes = read_image(image)?;
            let id = service.register(name, &bytes)?;
            let name = name.trim();
            Report::ok(
                json!({"id": id, "name": name}),
                format!("Registered {name} as #{id}"),
            )
        }
        Commands::Verify { image } => {
            let bytes = read_image(image)?;
            match service.verify(&bytes)? {
                MatchOutcome::Match(m) => Report::ok(
                    json!({"match_found": true, "id": m.id, "name": m.name, "score": m.score}),
                    format!("Match: {} (#{}) score {:.4}", m.name, m.id, m.score),
                ),
                MatchOutcome::NoMatch { best_score } => Report {
                    json: json!({"match_found": false, "best_score": best_score}),
                    text: match best_score {
                        Some(score) => format!(
                            "No match (best score {score:.4}, threshold {:.2})",
                            cli.threshold
                        ),
                        None => "No match (corpus is empty)".to_string(),
                    },
                    success: false,
                },
            }
        }
        Commands::List => {
            let entries = service.store().iterate_embeddings()?;
            let rows: Vec<Value> = entries
                .iter()
                .map(|e| json!({"id": e.id, "name": e.name, "created_at": e.created_at}))
                .collect();
            let text = if entries.is_empty() {
                "No faces registered".to_string()
            } else {
                entries
                    .iter()
                    .map(|e| format!("{:>6}  {:<32}  {}", e.id, e.name, e.created_at))
                    .collect::<Vec<_>>()
                    .join("\n")
            };
            Report::ok(Value::Array(rows), text)
        }
        Commands::Inspect { id, vector } => {
            let summary = service.summary(*id)?;
            let values = if *vector {
                Some(service.embedding_of(*id)?)
            } else {
                None
            };

            let mut out = serde_json::to_value(&summary)?;
            let mut lines = vec![
                format!("id:         {}", summary.id),
                format!("name:       {}", summary.name),
                format!("dimension:  {}", summary.dimension),
                format!("created_at: {}", summary.created_at),
            ];
            if let Some(values) = values {
                let norm = values.iter().map(|v| f64::from(*v).powi(2)).sum::<f64>().sqrt();
                lines.push(format!("norm:       {norm:.6}"));
                lines.push(format!("vector:     {values:?}"));
                out["vector"] = json!(values);
            }
            Report::ok(out, lines.join("\n"))
        }
        Commands::Status { load } => {
            let load_error = if *load {
                service.adapter().warm_up().err().map(|err| err.to_string())
            } else {
                None
            };
            let report = service.health()?;
            let bound = service.store().bound_backend()?;
            let dir = model_dir(cli);
            let models_present = [SCRFD_MODEL_FILE, ARCFACE_MODEL_FILE]
                .iter()
                .all(|f| dir.join(f).exists());

            let mut lines = vec![
                format!("db:             {}", db_path(cli).display()),
                format!("records:        {}", report.records),
                format!("backend:        {}", report.backend),
                format!("corpus backend: {}", bound.as_deref().unwrap_or("unbound")),
                format!("backend loaded: {}", report.backend_loaded),
            ];
            if let Some(err) = &load_error {
                lines.push(format!("load error:     {err}"));
            }
            if cli.backend == BackendKind::Onnx {
                lines.push(format!("model dir:      {}", dir.display()));
                lines.push(format!("models present: {models_present}"));
            }

            Report::ok(
                json!({
                    "db": db_path(cli),
                    "records": report.records,
                    "backend": report.backend,
                    "corpus_backend": bound,
                    "backend_loaded": report.backend_loaded,
                    "load_error": load_error,
                    "model_dir": dir,
                    "models_present": models_present,
                }),
                lines.join("\n"),
            )
        }
    };
    Ok(report)
}

fn db_path(cli: &Cli) -> PathBuf {
    cli.db.clone().unwrap_or_else(faceprint_core::default_db_path)
}

fn model_dir(cli: &Cli) -> PathBuf {
    cli.model_dir
        .clone()
        .unwrap_or_else(faceprint_core::default_model_dir)
}

fn open_service(cli: &Cli) -> Result<FaceService<SqliteCorpus>> {
    if !(-1.0..=1.0).contains(&cli.threshold) {
        bail!("threshold must be within [-1, 1], got {}", cli.threshold);
    }
    let path = db_path(cli);
    let store = SqliteCorpus::open(&path)
        .with_context(|| format!("opening corpus at {}", path.display()))?;
    store
        .bind_backend(&cli.backend.to_string())
        .context("corpus backend check")?;

    let adapter = Arc::new(BackendAdapter::new(cli.backend.loader(&model_dir(cli))));
    Ok(FaceService::new(adapter, store, cli.threshold))
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn write_png(dir: &TempDir, file: &str, image: RgbImage) -> PathBuf {
        let path = dir.path().join(file);
        image.save(&path).unwrap();
        path
    }

    fn vertical_stripes(dir: &TempDir) -> PathBuf {
        write_png(dir, "a.png", RgbImage::from_fn(64, 128, |x, _| {
            Rgb([if (x / 8) % 2 == 0 { 60 } else { 180 }; 3])
        }))
    }

    fn horizontal_stripes(dir: &TempDir) -> PathBuf {
        write_png(dir, "b.png", RgbImage::from_fn(64, 128, |_, y| {
            Rgb([if (y / 16) % 2 == 0 { 40 } else { 200 }; 3])
        }))
    }

    /// Run one command against the pixel backend and a corpus in `dir`.
    fn run(dir: &TempDir, args: &[&str]) -> Report {
        let db = dir.path().join("faces.db");
        let mut argv = vec![
            "faceprint".to_string(),
            "--backend".into(),
            "pixel".into(),
            "--db".into(),
            db.display().to_string(),
        ];
        argv.extend(args.iter().map(|a| a.to_string()));

        let cli = Cli::try_parse_from(argv).unwrap();
        let service = open_service(&cli).unwrap();
        execute(&cli, &service).unwrap()
    }

    fn path_arg(path: &Path) -> String {
        path.display().to_string()
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_register() {
        let cli = Cli::try_parse_from([
            "faceprint", "--backend", "pixel", "register", "--name", "Alice", "a.png",
        ])
        .unwrap();
        assert_eq!(cli.backend, BackendKind::Pixel);
        match cli.command {
            Commands::Register { name, image } => {
                assert_eq!(name, "Alice");
                assert_eq!(image, PathBuf::from("a.png"));
            }
            _ => panic!("expected register"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "faceprint", "verify", "b.png", "--threshold", "0.6", "--db", "/tmp/x.db", "--json",
        ])
        .unwrap();
        assert!((cli.threshold - 0.6).abs() < 1e-6);
        assert_eq!(db_path(&cli), PathBuf::from("/tmp/x.db"));
        assert!(cli.json);
    }

    #[test]
    fn test_rejects_unknown_backend() {
        assert!(Cli::try_parse_from(["faceprint", "--backend", "dlib", "list"]).is_err());
    }

    #[test]
    fn test_verify_match_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let image = path_arg(&vertical_stripes(&dir));

        let registered = run(&dir, &["register", "--name", " Alice ", &image]);
        assert!(registered.success);
        assert_eq!(registered.json, json!({"id": 1, "name": "Alice"}));
        assert_eq!(registered.text, "Registered Alice as #1");

        let verified = run(&dir, &["verify", &image]);
        assert!(verified.success);
        assert_eq!(verified.json["match_found"], true);
        assert_eq!(verified.json["id"], 1);
        assert_eq!(verified.json["name"], "Alice");
        assert!(verified.json["score"].as_f64().unwrap() > 0.99);
        assert!(verified.text.starts_with("Match: Alice (#1)"));
    }

    #[test]
    fn test_verify_without_match_fails() {
        let dir = tempfile::tempdir().unwrap();
        let known = path_arg(&vertical_stripes(&dir));
        let stranger = path_arg(&horizontal_stripes(&dir));

        let empty = run(&dir, &["verify", &stranger]);
        assert!(!empty.success);
        assert_eq!(empty.json, json!({"match_found": false, "best_score": null}));
        assert_eq!(empty.text, "No match (corpus is empty)");

        run(&dir, &["register", "--name", "Alice", &known]);
        let miss = run(&dir, &["verify", &stranger]);
        assert!(!miss.success);
        assert_eq!(miss.json["match_found"], false);
        assert!(miss.json["best_score"].as_f64().unwrap() < 0.40);
        assert!(miss.text.contains("threshold 0.40"));
    }

    #[test]
    fn test_list_and_inspect_json() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(run(&dir, &["list"]).text, "No faces registered");

        run(&dir, &["register", "--name", "Alice", &path_arg(&vertical_stripes(&dir))]);
        run(&dir, &["register", "--name", "Bob", &path_arg(&horizontal_stripes(&dir))]);

        let list = run(&dir, &["list", "--json"]);
        let rows = list.json.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], 1);
        assert_eq!(rows[1]["name"], "Bob");
        assert!(rows[0]["created_at"].is_string());
        assert!(rows[0].get("image").is_none());

        let inspect = run(&dir, &["inspect", "2"]);
        assert_eq!(inspect.json["name"], "Bob");
        assert_eq!(inspect.json["dimension"], 512);
        assert!(inspect.json.get("vector").is_none());

        let inspect = run(&dir, &["inspect", "2", "--vector"]);
        assert_eq!(inspect.json["vector"].as_array().unwrap().len(), 512);
        assert!(inspect.text.contains("norm:"));
    }

    #[test]
    fn test_status_reports_corpus_backend() {
        let dir = tempfile::tempdir().unwrap();
        let status = run(&dir, &["status"]);
        assert!(status.success);
        assert_eq!(status.json["records"], 0);
        assert_eq!(status.json["backend"], "pixel");
        assert_eq!(status.json["corpus_backend"], "pixel");
        assert_eq!(status.json["backend_loaded"], false);
        assert!(status.json["load_error"].is_null());

        let loaded = run(&dir, &["status", "--load"]);
        assert_eq!(loaded.json["backend_loaded"], true);
        assert!(loaded.text.contains("corpus backend: pixel"));
    }
}
