//! Smoke tests: the server driven by hand, without its real-time loop.

use std::time::Duration;

use frogue_server::bind_ephemeral;
use frogue_shared::{config::NetworkConfig, message::GameModeKind};
use frogue_tests::{init_tracing, raw_join, test_config};

#[tokio::test]
async fn every_mode_runs_empty() -> anyhow::Result<()> {
    init_tracing();
    for kind in [GameModeKind::Cooperative, GameModeKind::Deathmatch, GameModeKind::TeamDeathmatch] {
        let mut server = bind_ephemeral(NetworkConfig {
            game_mode: kind,
            ..test_config()
        })
        .await?;
        for _ in 0..40 {
            server.update(0.25);
        }
        assert_eq!(server.mode().kind(), kind);
        assert!(server.tick() >= 590, "{kind:?} ran {} ticks", server.tick());
        assert!(!server.mode().is_game_over());
        assert_eq!(server.world().entity_count(), 0);
        server.stop();
        server.update(0.25);
        assert!(server.tick() < 610);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cooperative_wave_starts_once_someone_joins() -> anyhow::Result<()> {
    init_tracing();
    let mut server = bind_ephemeral(NetworkConfig {
        game_mode: GameModeKind::Cooperative,
        ..test_config()
    })
    .await?;
    let addr = server.local_addr();

    let join = tokio::spawn(async move { raw_join(addr, "defender", 40010).await });
    while !join.is_finished() {
        server.update(1.0 / 60.0);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let (_conn, response) = join.await??;
    assert!(response.success);
    assert_eq!(server.player_count(), 1);

    for _ in 0..44 {
        server.update(0.25);
    }
    assert!(server.world().live_enemy_count() > 0, "no wave after the start delay");
    Ok(())
}
