use crate::{AddArgs, BuildArgs, ContextArgs, CreateArgs, QueryArgs, SessionArgs, ShowArgs};
use anyhow::{Context as AnyhowContext, Result};
use cycle_knowledge::{
    BuildOutcome, CollectionMetadata, DocumentMeta, KnowledgeConfig, KnowledgeStore, Metadata,
    NewDocument, RetrievalService, SearchHit,
};
use serde::Serialize;
use serde_json::Value;
use std::io::{self, Read};

#[derive(Serialize)]
struct ShowOutput<'a> {
    #[serde(flatten)]
    collection: &'a CollectionMetadata,
    documents: &'a [DocumentMeta],
}

#[derive(Serialize)]
struct AddOutput<'a> {
    collection_id: &'a str,
    document_id: &'a str,
}

#[derive(Serialize)]
struct SessionOutput<'a> {
    collection_id: &'a str,
    session_id: &'a str,
    added: bool,
}

#[derive(Serialize)]
struct QueryOutput<'a> {
    collection_id: &'a str,
    query: &'a str,
    results: &'a [SearchHit],
}

fn store(config: &KnowledgeConfig) -> KnowledgeStore {
    KnowledgeStore::new(config.data_dir.clone())
}

fn service(config: &KnowledgeConfig) -> Result<RetrievalService> {
    RetrievalService::new(config).context("Failed to initialise retrieval service")
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Turn `key=value` pairs into metadata, keeping values that parse as JSON typed
fn to_metadata(pairs: Vec<(String, String)>) -> Metadata {
    pairs
        .into_iter()
        .map(|(key, raw)| {
            let value = serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw));
            (key, value)
        })
        .collect()
}

pub(crate) async fn run_create(config: &KnowledgeConfig, args: CreateArgs) -> Result<()> {
    let title = args.title.unwrap_or_else(|| args.id.clone());
    let metadata = store(config)
        .create_collection(&args.id, &title, args.description)
        .await?;
    if args.json {
        print_json(&metadata)?;
    } else {
        println!("Created collection {} ({})", metadata.id, metadata.title);
    }
    Ok(())
}

pub(crate) async fn run_list(config: &KnowledgeConfig, json: bool) -> Result<()> {
    let collections = store(config).list_collections().await?;
    if json {
        return print_json(&collections);
    }
    if collections.is_empty() {
        eprintln!("No collections in {}", config.data_dir.display());
    }
    for c in &collections {
        let state = if c.indexed { "indexed" } else { "not indexed" };
        println!(
            "{}\t{}\t{} documents, {} sessions, {state}",
            c.id, c.title, c.document_count, c.session_count
        );
    }
    Ok(())
}

pub(crate) async fn run_show(config: &KnowledgeConfig, args: ShowArgs) -> Result<()> {
    let store = store(config);
    let collection = store.get_collection(&args.id).await?;
    let documents = store.list_documents(&args.id).await?;
    if args.json {
        return print_json(&ShowOutput {
            collection: &collection,
            documents: &documents,
        });
    }

    println!("{} ({})", collection.title, collection.id);
    if let Some(description) = &collection.description {
        println!("{description}");
    }
    let kb = &collection.knowledge_base;
    println!(
        "created {}, {} documents, {}",
        collection.created_at.to_rfc3339(),
        kb.document_count,
        if kb.indexed { "indexed" } else { "not indexed" }
    );
    for session in &collection.sessions {
        println!("  session {} (added {})", session.session_id, session.added_at.to_rfc3339());
    }
    for doc in &documents {
        println!("  {}\t{}", doc.id, doc.title);
    }
    Ok(())
}

pub(crate) async fn run_add(config: &KnowledgeConfig, args: AddArgs) -> Result<()> {
    let text = match &args.file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read document text from stdin")?;
            buf
        }
    };

    let document = NewDocument {
        text,
        title: args.title,
        document_id: args.document_id,
        metadata: to_metadata(args.meta),
    };
    let document_id = store(config)
        .add_document(&args.collection, document)
        .await?;
    if args.json {
        print_json(&AddOutput {
            collection_id: &args.collection,
            document_id: &document_id,
        })?;
    } else {
        println!("{document_id}");
    }
    Ok(())
}

pub(crate) async fn run_session(config: &KnowledgeConfig, args: SessionArgs) -> Result<()> {
    let added = store(config)
        .add_session(&args.collection, &args.session, to_metadata(args.info))
        .await?;
    if args.json {
        print_json(&SessionOutput {
            collection_id: &args.collection,
            session_id: &args.session,
            added,
        })?;
    } else if !added {
        eprintln!(
            "Session {} is already registered with {}",
            args.session, args.collection
        );
    }
    Ok(())
}

pub(crate) async fn run_build(config: &KnowledgeConfig, args: BuildArgs) -> Result<()> {
    let outcome = service(config)?
        .build_knowledge_base_index(&args.collection)
        .await?;
    if args.json {
        return print_json(&outcome);
    }
    match outcome {
        BuildOutcome::NothingToIndex => {
            eprintln!("No documents in {}; nothing to index", args.collection);
        }
        BuildOutcome::Built(report) => {
            eprintln!(
                "Indexed {} documents, {} chunks in {}ms ({} '{}', dim {}, {} index)",
                report.documents,
                report.chunks,
                report.elapsed_ms,
                report.embedding,
                report.model_id,
                report.dimension,
                report.backend
            );
            if report.is_degraded() {
                eprintln!(
                    "Warning: {} chunks could not be embedded and will not match queries",
                    report.degraded_embeddings
                );
            }
            if !report.indexed {
                eprintln!("Warning: documents were added during the build; run build again");
            }
        }
    }
    Ok(())
}

pub(crate) async fn run_query(config: &KnowledgeConfig, args: QueryArgs) -> Result<()> {
    let hits = service(config)?
        .retrieve(&args.collection, &args.query, args.max_results)
        .await?;
    if args.json {
        return print_json(&QueryOutput {
            collection_id: &args.collection,
            query: &args.query,
            results: &hits,
        });
    }
    if hits.is_empty() {
        eprintln!("No results");
    }
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. {} [{}#{}] (score: {:.3})",
            i + 1,
            hit.chunk.title,
            hit.chunk.document_id,
            hit.chunk.chunk_ordinal,
            hit.score
        );
        println!("   {}", preview(&hit.chunk.chunk_text, 160));
    }
    Ok(())
}

pub(crate) async fn run_context(config: &KnowledgeConfig, args: ContextArgs) -> Result<()> {
    let context = service(config)?
        .retrieve_context(&args.collection, &args.query, args.max_results)
        .await?;
    print!("{context}");
    Ok(())
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
