use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;

use tbft_consensus_core::block::BlockId;
use tbft_consensus_core::height::Round;
use tbft_consensus_core::msg::{ConsensusMessage as _, Precommit, Prevote, Proposal};
use tbft_consensus_core::validator::{ConsensusSeckey, ValidatorIdx};
use tbft_consensus_storage::ConsensusStorageError;
use tbft_util_error::BoxedErrorResult;

use super::ProcessorResult;
use crate::fixture::{Fixture, wait_for};

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn accepted_proposal_is_stored_broadcast_and_handled() -> BoxedErrorResult<()> {
    let fixture = Fixture::new(4, 10).await?;
    let proposal = fixture.proposal(0);

    assert_eq!(
        fixture
            .proposal_processor
            .process(proposal.serialized(), true)
            .await?,
        ProcessorResult::Accepted
    );

    let round_state = fixture.round_states.get_round_state(fixture.height, Round::ZERO);
    assert_eq!(round_state.get_proposal(), Some(proposal.clone()));
    assert_eq!(fixture.storage.get_proposals().await?, vec![proposal.clone()]);

    wait_for(|| !fixture.broadcaster.proposals.lock().expect("Locking failed").is_empty()).await;
    wait_for(|| !fixture.consensus.handled.lock().expect("Locking failed").is_empty()).await;
    assert_eq!(
        *fixture.broadcaster.proposals.lock().expect("Locking failed"),
        vec![proposal]
    );

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn replayed_proposal_is_skipped_and_not_rebroadcast() -> BoxedErrorResult<()> {
    let fixture = Fixture::new(4, 10).await?;
    let proposal = fixture.proposal(0);
    let other = fixture.proposal_with(0, 0, fixture.block(0, b"other txs"), None, None);

    let processor = &fixture.proposal_processor;
    assert_eq!(
        processor.process(proposal.serialized(), false).await?,
        ProcessorResult::Accepted
    );
    assert_eq!(
        processor.process(proposal.serialized(), true).await?,
        ProcessorResult::Skipped
    );
    assert_eq!(
        processor.process(other.serialized(), true).await?,
        ProcessorResult::Skipped
    );

    assert_eq!(fixture.storage.get_proposals().await?, vec![proposal]);
    wait_for(|| !fixture.consensus.handled.lock().expect("Locking failed").is_empty()).await;
    assert!(fixture.broadcaster.proposals.lock().expect("Locking failed").is_empty());

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn malformed_messages_are_invalid() -> BoxedErrorResult<()> {
    let fixture = Fixture::new(4, 10).await?;

    assert_eq!(
        fixture.proposal_processor.process(b"garbage", true).await?,
        ProcessorResult::Invalid
    );
    assert_eq!(
        fixture.prevote_processor.process(&[], true).await?,
        ProcessorResult::Invalid
    );

    // Trailing bytes after a valid message
    let mut bytes = fixture.precommit(1, 0, None).serialized().to_vec();
    bytes.push(0);
    assert_eq!(
        fixture.precommit_processor.process(&bytes, true).await?,
        ProcessorResult::Invalid
    );

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn stale_messages_are_skipped_regardless_of_signature() -> BoxedErrorResult<()> {
    let fixture = Fixture::new(4, 10).await?;
    fixture.consensus.set_round(2);

    // Past round, signed by the wrong key
    let mut data = fixture.vote_data(1, 1, None);
    let forged = Prevote::new_signed(data, ConsensusSeckey::generate());
    assert_eq!(
        fixture.prevote_processor.process(forged.serialized(), true).await?,
        ProcessorResult::Skipped
    );

    // Other height
    data.height = fixture.height.next().expect("Can't overflow");
    data.round = Round::new(2);
    let other_height = Prevote::new_signed(data, fixture.seckey(1));
    assert_eq!(
        fixture
            .prevote_processor
            .process(other_height.serialized(), true)
            .await?,
        ProcessorResult::Skipped
    );

    assert_eq!(
        fixture
            .proposal_processor
            .process(fixture.proposal(1).serialized(), true)
            .await?,
        ProcessorResult::Skipped
    );

    // Future rounds are fine
    assert_eq!(
        fixture
            .precommit_processor
            .process(fixture.precommit(0, 3, None).serialized(), false)
            .await?,
        ProcessorResult::Accepted
    );

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn proposal_policy_violations_are_invalid() -> BoxedErrorResult<()> {
    let fixture = Fixture::new(4, 10).await?;
    let processor = &fixture.proposal_processor;

    // Round 1 is validator 1's
    let not_proposer = fixture.proposal_with(2, 1, fixture.block(2, b"txs"), None, None);
    assert_eq!(
        processor.process(not_proposer.serialized(), true).await?,
        ProcessorResult::Invalid
    );

    // Beyond `max_rounds_ahead` of 10
    let too_far = fixture.proposal(11);
    assert_eq!(
        processor.process(too_far.serialized(), true).await?,
        ProcessorResult::Invalid
    );
    assert_eq!(
        processor.process(fixture.proposal(10).serialized(), true).await?,
        ProcessorResult::Accepted
    );

    // Block generated by someone else than the proposer
    let wrong_generator = fixture.proposal_with(1, 1, fixture.block(3, b"txs"), None, None);
    assert_eq!(
        processor.process(wrong_generator.serialized(), true).await?,
        ProcessorResult::Invalid
    );

    // Signed by a key of another validator
    let proposal = Proposal::new_signed(fixture.proposal(1).data().clone(), fixture.seckey(0));
    assert_eq!(
        processor.process(proposal.serialized(), true).await?,
        ProcessorResult::Invalid
    );

    assert!(!fixture
        .round_states
        .get_round_state(fixture.height, Round::new(1))
        .has_proposal());

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn lock_proof_gate() -> BoxedErrorResult<()> {
    let fixture = Fixture::new(4, 10).await?;
    let processor = &fixture.proposal_processor;

    // Validator 2 re-proposes at round 2 a block validator 0 generated
    let block = fixture.block(0, b"locked txs");
    let block_id = block.id();

    let same_round = fixture.proposal_with(2, 2, block.clone(), Some(2), None);
    assert_eq!(
        processor.process(same_round.serialized(), true).await?,
        ProcessorResult::Invalid
    );

    let later_round = fixture.proposal_with(2, 2, block.clone(), Some(3), None);
    assert_eq!(
        processor.process(later_round.serialized(), true).await?,
        ProcessorResult::Invalid
    );

    let not_enough = fixture.proposal_with(
        2,
        2,
        block.clone(),
        Some(0),
        Some(fixture.lock_proof(0, block_id, &[0, 1])),
    );
    assert_eq!(
        processor.process(not_enough.serialized(), true).await?,
        ProcessorResult::Invalid
    );

    let wrong_round = fixture.proposal_with(
        2,
        2,
        block.clone(),
        Some(0),
        Some(fixture.lock_proof(1, block_id, &[0, 1, 3])),
    );
    assert_eq!(
        processor.process(wrong_round.serialized(), true).await?,
        ProcessorResult::Invalid
    );

    let mut corrupted_proof = fixture.lock_proof(0, block_id, &[0, 1, 3]);
    corrupted_proof.signatures.swap(0, 1);
    let corrupted = fixture.proposal_with(2, 2, block.clone(), Some(0), Some(corrupted_proof));
    assert_eq!(
        processor.process(corrupted.serialized(), true).await?,
        ProcessorResult::Invalid
    );

    let valid = fixture.proposal_with(
        2,
        2,
        block,
        Some(0),
        Some(fixture.lock_proof(0, block_id, &[0, 1, 3])),
    );
    assert_eq!(
        processor.process(valid.serialized(), true).await?,
        ProcessorResult::Accepted
    );

    Ok(())
}

/// A re-proposal without its lock proof is let through, the proof may
/// arrive separately
#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn missing_lock_proof_is_tolerated() -> BoxedErrorResult<()> {
    let fixture = Fixture::new(4, 10).await?;

    let reproposal = fixture.proposal_with(1, 1, fixture.block(3, b"txs"), Some(0), None);
    assert_eq!(
        fixture
            .proposal_processor
            .process(reproposal.serialized(), true)
            .await?,
        ProcessorResult::Accepted
    );

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn votes_are_deduplicated_per_validator_and_round() -> BoxedErrorResult<()> {
    let fixture = Fixture::new(4, 10).await?;
    let block_id = Some(BlockId::from_bytes([7; 32]));
    let processor = &fixture.prevote_processor;

    assert_eq!(
        processor
            .process(fixture.prevote(1, 0, block_id).serialized(), true)
            .await?,
        ProcessorResult::Accepted
    );
    assert_eq!(
        processor
            .process(fixture.prevote(1, 0, None).serialized(), true)
            .await?,
        ProcessorResult::Skipped
    );
    assert_eq!(
        processor
            .process(fixture.prevote(1, 1, None).serialized(), true)
            .await?,
        ProcessorResult::Accepted
    );
    assert_eq!(
        processor
            .process(fixture.prevote(2, 0, None).serialized(), true)
            .await?,
        ProcessorResult::Accepted
    );

    let round_state = fixture.round_states.get_round_state(fixture.height, Round::ZERO);
    assert_eq!(
        round_state
            .get_prevote(ValidatorIdx::new(1))
            .and_then(|p| p.block_id()),
        block_id
    );
    assert_eq!(fixture.storage.get_prevotes().await?.len(), 3);

    wait_for(|| fixture.broadcaster.prevotes.lock().expect("Locking failed").len() == 3).await;

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn vote_signature_gate() -> BoxedErrorResult<()> {
    let fixture = Fixture::new(4, 10).await?;

    let forged = Precommit::new_signed(
        fixture.vote_data(2, 0, None),
        fixture.seckey(3),
    );
    assert_eq!(
        fixture
            .precommit_processor
            .process(forged.serialized(), true)
            .await?,
        ProcessorResult::Invalid
    );

    let unknown = Precommit::new_signed(
        fixture.vote_data(4, 0, None),
        ConsensusSeckey::generate(),
    );
    assert_eq!(
        fixture
            .precommit_processor
            .process(unknown.serialized(), true)
            .await?,
        ProcessorResult::Invalid
    );

    assert!(!fixture
        .round_states
        .get_round_state(fixture.height, Round::ZERO)
        .has_precommit(ValidatorIdx::new(2)));
    assert!(fixture.storage.get_precommits().await?.is_empty());

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn failed_broadcast_does_not_fail_processing() -> BoxedErrorResult<()> {
    let fixture = Fixture::new(4, 10).await?;
    let precommit = fixture.precommit(3, 0, None);

    assert_eq!(
        fixture
            .precommit_processor
            .process(precommit.serialized(), true)
            .await?,
        ProcessorResult::Accepted
    );
    assert_eq!(fixture.storage.get_precommits().await?, vec![precommit.clone()]);

    wait_for(|| !fixture.consensus.handled.lock().expect("Locking failed").is_empty()).await;
    assert_eq!(
        fixture
            .round_states
            .get_round_state(fixture.height, Round::ZERO)
            .get_precommit(ValidatorIdx::new(3)),
        Some(precommit)
    );

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn proposal_waits_for_block_commit() -> BoxedErrorResult<()> {
    let fixture = Arc::new(Fixture::new(4, 10).await?);
    let proposal = fixture.proposal(0);

    let commit_guard = fixture.commit_lock.write().await;
    let task = tokio::spawn({
        let fixture = fixture.clone();
        let bytes = proposal.serialized().clone();
        async move { fixture.proposal_processor.process(&bytes, true).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!task.is_finished());
    assert!(
        !fixture
            .round_states
            .get_round_state(fixture.height, Round::ZERO)
            .has_proposal()
    );

    drop(commit_guard);
    assert_eq!(task.await??, ProcessorResult::Accepted);

    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn storage_failure_is_an_error_and_leaves_no_trace() -> BoxedErrorResult<()> {
    let fixture = Fixture::with_failing_storage(4, 10).await?;
    let proposal = fixture.proposal(0);
    let prevote = fixture.prevote(1, 0, Some(proposal.block().id()));
    let round_state = fixture.round_states.get_round_state(fixture.height, Round::ZERO);

    for _ in 0..2 {
        assert_matches!(
            fixture
                .proposal_processor
                .process(proposal.serialized(), true)
                .await,
            Err(ConsensusStorageError::UnknownValidator { .. })
        );
        assert!(!round_state.has_proposal());

        // Redelivery must retry the save, not be skipped as a duplicate
        assert_matches!(
            fixture
                .prevote_processor
                .process(prevote.serialized(), true)
                .await,
            Err(ConsensusStorageError::UnknownValidator { .. })
        );
        assert!(!round_state.has_prevote(ValidatorIdx::new(1)));
        assert_eq!(round_state.prevotes_count(), 0);
    }

    assert!(fixture.storage.get_proposals().await?.is_empty());
    assert!(fixture.storage.get_prevotes().await?.is_empty());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(fixture.broadcaster.proposals.lock().expect("Locking failed").is_empty());
    assert!(fixture.broadcaster.prevotes.lock().expect("Locking failed").is_empty());
    assert!(fixture.consensus.handled.lock().expect("Locking failed").is_empty());

    Ok(())
}
