//! In-memory walkthrough with two client sessions.

use std::sync::Arc;

use anyhow::{Context, Result};
use collab_client::{ClientConfig, ClientSession, MessageOutcome};
use collab_core::change::{
    AddFeatureChange, AddFeatureDetails, LocationEndChange, LocationEndDetails, TypeChange,
    TypeDetails,
};
use collab_core::model::{AssemblySnapshot, FeatureSnapshot, RefSeqSpec, Role, Strand, User};
use collab_core::{Change, ChangeBackend, EngineConfig, InMemoryBus};
use collab_server::{ChangeService, LocalBackend};
use tracing::info;

fn session(service: &Arc<ChangeService>, bus: &Arc<InMemoryBus>, user: &str) -> Result<ClientSession> {
    let backend: Arc<dyn ChangeBackend> = Arc::new(LocalBackend::new(service.clone(), user));
    let mut session = ClientSession::open(
        ClientConfig::default(),
        service.registry().clone(),
        Some(backend),
        bus.clone(),
    );
    session.load_assembly(&service.snapshot().export_assembly("A1")?)?;
    Ok(session)
}

async fn expect_next(session: &mut ClientSession, expected: MessageOutcome) -> Result<()> {
    let outcome = session
        .process_next()
        .await
        .context("Session inbox closed")??;
    anyhow::ensure!(outcome == expected, "expected {:?}, got {:?}", expected, outcome);
    Ok(())
}

pub async fn run(mut config: EngineConfig) -> Result<()> {
    config.persist = false;
    let bus = Arc::new(InMemoryBus::new(config.channel_capacity));
    let service = Arc::new(ChangeService::new(config, bus.clone())?);
    service.register_user(User::new("alice", Role::Admin))?;
    service.register_user(User::new("bob", Role::User))?;
    service.import_assembly(&AssemblySnapshot {
        id: "A1".into(),
        name: "hg38".into(),
        ref_seqs: vec![
            RefSeqSpec::new("r1", "chr1", 248_956_422),
            RefSeqSpec::new("r2", "chr2", 242_193_529),
        ],
        features: vec![],
    })?;

    let mut alice = session(&service, &bus, "alice")?;
    let mut bob = session(&service, &bus, "bob")?;

    let gene = FeatureSnapshot::new("BRCA2", "gene", "r1", 32_315_480, 32_400_268)
        .with_strand(Strand::Forward)
        .with_child(FeatureSnapshot::new("BRCA2-201", "mRNA", "r1", 32_315_480, 32_399_672));
    let entry = alice
        .submit(Change::AddFeature(AddFeatureChange::new(
            "A1",
            vec![AddFeatureDetails::new("BRCA2", "A1").with_feature(gene)],
        )))
        .await?
        .context("change was not submitted")?;
    info!(sequence = entry.sequence, "alice added BRCA2");

    expect_next(&mut alice, MessageOutcome::SkippedEcho).await?;
    expect_next(&mut bob, MessageOutcome::Applied).await?;
    info!("bob received BRCA2 over A1-chr1");

    bob.mark_disconnected();
    alice
        .submit(Change::LocationEnd(LocationEndChange::new(
            "A1",
            vec![LocationEndDetails {
                feature_id: "BRCA2-201".into(),
                old_end: 32_399_672,
                new_end: 32_400_100,
            }],
        )))
        .await?;
    alice
        .submit(Change::Type(TypeChange::new(
            "A1",
            vec![TypeDetails {
                feature_id: "BRCA2-201".into(),
                old_type: "mRNA".into(),
                new_type: "transcript".into(),
            }],
        )))
        .await?;
    info!("alice edited BRCA2-201 while bob was offline");

    let replayed = bob.reconnect().await?;
    let transcript = bob
        .manager()
        .data_store()
        .store()
        .features()
        .snapshot("BRCA2-201")?;
    info!(
        replayed,
        end = transcript.end,
        feature_type = %transcript.feature_type,
        "bob caught up after reconnect"
    );

    println!(
        "log entries: {}, bob mirror features: {}, bob replayed: {}",
        service.change_log().len(),
        bob.manager().data_store().store().features().len(),
        replayed
    );
    Ok(())
}
