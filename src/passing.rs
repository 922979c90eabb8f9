//! Cross-person paper passing.
//!
//! Wrists of every unordered pair of distinct people are compared. People whose
//! own wrists nearly touch (unusable pose) or who hold both arms straight up
//! (a hand raise, not a reach) are left out before pairing.

use crate::config::Geometry;
use crate::detect::{Keypoint, Landmark, Pose};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Hand {
    Left,
    Right,
}

impl Hand {
    pub fn landmark(self) -> Landmark {
        match self {
            Hand::Left => Landmark::LeftWrist,
            Hand::Right => Landmark::RightWrist,
        }
    }
}

/// Two wrists of different people close enough to be exchanging paper.
///
/// Person indices are positions in the frame's pose list.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WristContact {
    pub first: usize,
    pub first_hand: Hand,
    pub second: usize,
    pub second_hand: Hand,
    pub distance: f32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PassingResult {
    pub contacts: Vec<WristContact>,
}

impl PassingResult {
    pub fn detected(&self) -> bool {
        !self.contacts.is_empty()
    }

    /// True if the given wrist took part in any contact.
    pub fn involves(&self, person: usize, hand: Hand) -> bool {
        self.contacts.iter().any(|c| {
            (c.first == person && c.first_hand == hand)
                || (c.second == person && c.second_hand == hand)
        })
    }
}

struct Candidate {
    index: usize,
    wrists: [(Hand, Keypoint); 2],
}

fn is_vertical_raise(pose: &Pose, left: Keypoint, right: Keypoint, g: &Geometry) -> bool {
    let shoulder_y = pose
        .get(Landmark::LeftShoulder)
        .y
        .min(pose.get(Landmark::RightShoulder).y);
    let wrist_line = shoulder_y - g.pass_raise_wrist_margin;
    let elbow_line = shoulder_y - g.pass_raise_elbow_margin;
    left.y < wrist_line
        && right.y < wrist_line
        && pose.get(Landmark::LeftElbow).y < elbow_line
        && pose.get(Landmark::RightElbow).y < elbow_line
}

fn candidate(index: usize, pose: &Pose, g: &Geometry) -> Option<Candidate> {
    let (left, right) = pose.wrists()?;
    if left.distance(&right) < g.pass_min_self_wrist_distance {
        return None;
    }
    if is_vertical_raise(pose, left, right, g) {
        return None;
    }
    Some(Candidate {
        index,
        wrists: [(Hand::Left, left), (Hand::Right, right)],
    })
}

fn usable(wrist: &Keypoint) -> bool {
    wrist.is_visible() && wrist.x != 0.0
}

pub fn detect_passing_paper(poses: &[Pose], g: &Geometry) -> PassingResult {
    let mut result = PassingResult::default();
    if poses.iter().filter(|p| p.wrists().is_some()).count() < 2 {
        return result;
    }

    let candidates: Vec<Candidate> = poses
        .iter()
        .enumerate()
        .filter_map(|(i, pose)| candidate(i, pose, g))
        .collect();

    for (n, a) in candidates.iter().enumerate() {
        for b in &candidates[n + 1..] {
            for (a_hand, a_wrist) in a.wrists {
                for (b_hand, b_wrist) in b.wrists {
                    if !usable(&a_wrist) || !usable(&b_wrist) {
                        continue;
                    }
                    if (a_wrist.y - b_wrist.y).abs() > g.pass_max_vertical_diff {
                        continue;
                    }
                    let distance = a_wrist.distance(&b_wrist);
                    if distance < g.pass_max_wrist_distance {
                        result.contacts.push(WristContact {
                            first: a.index,
                            first_hand: a_hand,
                            second: b.index,
                            second_hand: b_hand,
                            distance,
                        });
                    }
                }
            }
        }
    }

    if result.detected() {
        log::debug!("paper passing: {} close wrist pair(s)", result.contacts.len());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::tests::pose_with;

    fn person(left: (f32, f32), right: (f32, f32)) -> Pose {
        pose_with(&[
            (Landmark::LeftShoulder, 300.0, 250.0),
            (Landmark::RightShoulder, 200.0, 250.0),
            (Landmark::LeftElbow, 320.0, 280.0),
            (Landmark::RightElbow, 180.0, 280.0),
            (Landmark::LeftWrist, left.0, left.1),
            (Landmark::RightWrist, right.0, right.1),
        ])
    }

    #[test]
    fn neighbouring_wrists_flag_passing() {
        let g = Geometry::default();
        let poses = vec![
            person((120.0, 305.0), (380.0, 300.0)),
            person((140.0, 310.0), (900.0, 900.0)),
        ];
        let result = detect_passing_paper(&poses, &g);
        assert!(result.detected());
        assert_eq!(result.contacts.len(), 1);
        let contact = result.contacts[0];
        assert_eq!((contact.first, contact.first_hand), (0, Hand::Left));
        assert_eq!((contact.second, contact.second_hand), (1, Hand::Left));
        assert!(result.involves(1, Hand::Left));
        assert!(!result.involves(1, Hand::Right));
    }

    #[test]
    fn single_person_never_passes() {
        let g = Geometry::default();
        let poses = vec![person((120.0, 305.0), (380.0, 300.0))];
        assert!(!detect_passing_paper(&poses, &g).detected());
    }

    #[test]
    fn person_with_own_wrists_together_is_ignored() {
        let g = Geometry::default();
        // first person's wrists are 20px apart
        let poses = vec![
            person((100.0, 300.0), (120.0, 305.0)),
            person((140.0, 310.0), (900.0, 900.0)),
        ];
        assert!(!detect_passing_paper(&poses, &g).detected());
    }

    #[test]
    fn large_vertical_gap_is_not_a_pass() {
        let g = Geometry::default();
        // 160px apart vertically, 160px total distance
        let poses = vec![
            person((120.0, 300.0), (380.0, 300.0)),
            person((120.0, 460.0), (900.0, 900.0)),
        ];
        assert!(!detect_passing_paper(&poses, &g).detected());
    }

    #[test]
    fn both_arms_straight_up_is_a_hand_raise() {
        let g = Geometry::default();
        let mut raiser = person((150.0, 100.0), (260.0, 100.0));
        raiser.keypoints[Landmark::LeftElbow as usize] = Keypoint::new(320.0, 180.0);
        raiser.keypoints[Landmark::RightElbow as usize] = Keypoint::new(180.0, 180.0);
        let neighbour = person((170.0, 120.0), (900.0, 900.0));
        assert!(!detect_passing_paper(&[raiser.clone(), neighbour.clone()], &g).detected());

        // elbows at shoulder height: a reach, not a raise
        let reacher = person((150.0, 100.0), (260.0, 100.0));
        assert!(detect_passing_paper(&[reacher, neighbour], &g).detected());
    }

    #[test]
    fn hidden_wrists_never_pair() {
        let g = Geometry::default();
        let poses = vec![
            person((0.0, 0.0), (380.0, 300.0)),
            person((0.0, 0.0), (900.0, 900.0)),
        ];
        assert!(!detect_passing_paper(&poses, &g).detected());
    }
}
