use std::cmp::Ordering;

use crate::models::{GroupMember, Grouping, ParticipantResult, RankingBasis, Tally};

/// Partitions a scored roster into heterogeneous groups of roughly `group_size`.
///
/// Participants are stably sorted ascending by the ranking value and dealt
/// round-robin into `ceil(n / group_size)` groups, so neighbours in the
/// ranking end up in different groups. A non-positive `group_size` yields no
/// groups.
///
/// When `category` is given, the ranking value is `correct / total` for that
/// category, but only if every participant has at least one question in it.
/// Otherwise the whole roster is ranked by overall score and the returned
/// basis says so, listing the participants that lacked the category.
pub fn form_groups(
    roster: &[ParticipantResult],
    group_size: i64,
    category: Option<&str>,
) -> Grouping {
    let basis = ranking_basis(roster, category);

    if group_size <= 0 || roster.is_empty() {
        return Grouping::empty(basis);
    }

    let mut ranked: Vec<&ParticipantResult> = roster.iter().collect();
    match &basis {
        RankingBasis::Category { category } => ranked.sort_by(|a, b| {
            compare_ratio(category_tally(a, category), category_tally(b, category))
        }),
        RankingBasis::OverallScore | RankingBasis::OverallScoreFallback { .. } => {
            ranked.sort_by_key(|p| p.score)
        }
    }

    let num_groups = ranked.len().div_ceil(group_size as usize);
    let mut groups: Vec<Vec<GroupMember>> = vec![Vec::new(); num_groups];
    for (position, participant) in ranked.into_iter().enumerate() {
        groups[position % num_groups].push(GroupMember {
            participant_id: participant.id.clone(),
            display_name: participant.display_name.clone(),
            score: participant.score,
        });
    }
    groups.retain(|group| !group.is_empty());

    Grouping { basis, groups }
}

fn ranking_basis(roster: &[ParticipantResult], category: Option<&str>) -> RankingBasis {
    let Some(requested) = category.map(|c| c.trim().to_lowercase()) else {
        return RankingBasis::OverallScore;
    };

    let missing: Vec<_> = roster
        .iter()
        .filter(|p| category_tally(p, &requested).total == 0)
        .map(|p| p.id.clone())
        .collect();

    if missing.is_empty() {
        RankingBasis::Category {
            category: requested,
        }
    } else {
        RankingBasis::OverallScoreFallback {
            requested_category: requested,
            missing,
        }
    }
}

fn category_tally(participant: &ParticipantResult, category: &str) -> Tally {
    participant
        .breakdown
        .get(category)
        .map(|score| Tally {
            correct: score.correct,
            total: score.total,
        })
        .unwrap_or_default()
}

// a.correct / a.total vs b.correct / b.total without floating point
fn compare_ratio(a: Tally, b: Tally) -> Ordering {
    let lhs = u64::from(a.correct) * u64::from(b.total);
    let rhs = u64::from(b.correct) * u64::from(a.total);
    lhs.cmp(&rhs)
}
