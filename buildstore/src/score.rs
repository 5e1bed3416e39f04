use serde::{Deserialize, Serialize};

/// Score record emitted by a test script as one line of JSON.
///
/// `secret` ties the record to a course; records carrying any other
/// secret are not collected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TestScore {
    pub secret: String,
    pub test_name: String,
    pub score: i64,
    pub max_score: i64,
    pub weight: i64,
}

/// Parse a log line as a score record. Anything but a JSON object is `None`.
pub fn parse_score_line(line: &str) -> Option<TestScore> {
    serde_json::from_str(line.trim()).ok()
}

/// Weighted total of `scores` on a 0-100 scale.
///
/// Each record contributes `min(score, max) / max` scaled by its share of
/// the summed weight. Records with `max_score <= 0` contribute nothing; a
/// zero total weight yields 0. The result is floored.
pub fn total_score(scores: &[TestScore]) -> u32 {
    let total_weight: f64 = scores.iter().map(|s| s.weight as f64).sum();
    if total_weight == 0.0 {
        return 0;
    }

    let fraction: f64 = scores
        .iter()
        .filter(|s| s.max_score > 0)
        .map(|s| {
            let achieved = s.score.clamp(0, s.max_score) as f64 / s.max_score as f64;
            achieved * (s.weight as f64 / total_weight)
        })
        .sum();

    // absorbs float error so e.g. three thirds floor to 100, not 99
    let percent = (fraction * 100.0 + 1e-9).floor();
    percent.clamp(0.0, 100.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(name: &str, score: i64, max_score: i64, weight: i64) -> TestScore {
        TestScore {
            secret: "s".into(),
            test_name: name.into(),
            score,
            max_score,
            weight,
        }
    }

    #[test]
    fn parses_pascal_case_record() {
        let line = r#"{"Secret":"my secret code","TestName":"TestErrorsAG","Score":16,"MaxScore":16,"Weight":20}"#;
        let parsed = parse_score_line(line).unwrap();
        assert_eq!(parsed.secret, "my secret code");
        assert_eq!(parsed.test_name, "TestErrorsAG");
        assert_eq!((parsed.score, parsed.max_score, parsed.weight), (16, 16, 20));
    }

    #[test]
    fn non_json_is_not_a_score() {
        assert!(parse_score_line("TestErrorsAG: 16/16 cases passed").is_none());
        assert!(parse_score_line("[1, 2]").is_none());
    }

    #[test]
    fn six_of_seven_equal_tests_is_85() {
        let mut scores: Vec<TestScore> = (0..6).map(|i| score(&format!("t{i}"), 3, 3, 20)).collect();
        scores.push(score("failing", 0, 5, 20));
        assert_eq!(total_score(&scores), 85);
    }

    #[test]
    fn score_clamped_to_max() {
        assert_eq!(total_score(&[score("t", 50, 10, 1)]), 100);
    }

    #[test]
    fn zero_max_contributes_nothing() {
        let scores = [score("a", 5, 0, 1), score("b", 1, 1, 1)];
        assert_eq!(total_score(&scores), 50);
    }

    #[test]
    fn zero_total_weight_is_zero() {
        assert_eq!(total_score(&[score("a", 1, 1, 0)]), 0);
        assert_eq!(total_score(&[]), 0);
    }

    #[test]
    fn equal_thirds_reach_100() {
        let scores = [score("a", 1, 1, 1), score("b", 1, 1, 1), score("c", 1, 1, 1)];
        assert_eq!(total_score(&scores), 100);
    }

    #[test]
    fn partial_scores_are_weighted() {
        // 1/2 * 3/4 + 1/1 * 1/4 = 0.625
        let scores = [score("a", 1, 2, 3), score("b", 1, 1, 1)];
        assert_eq!(total_score(&scores), 62);
    }
}
