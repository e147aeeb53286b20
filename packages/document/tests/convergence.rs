/// Convergence checks for text step rebasing.
/// Every pair of single edits on a small document is applied in both orders.
use collab_document::{apply_all, rebase_steps, Step, TextDocument, TextStep};

const BASE: &str = "abcde";

fn all_single_edits() -> Vec<TextStep> {
    let chars: Vec<char> = BASE.chars().collect();
    let mut steps = Vec::new();

    for pos in 0..=chars.len() {
        steps.push(TextStep::insert(pos, "X"));
        steps.push(TextStep::insert(pos, "YY"));
    }
    for start in 0..chars.len() {
        for end in start + 1..=chars.len() {
            let text: String = chars[start..end].iter().collect();
            steps.push(TextStep::delete(start, text));
        }
    }
    steps
}

#[test]
fn test_pairwise_convergence() {
    let edits = all_single_edits();
    let mut checked = 0;

    for a in &edits {
        for b in &edits {
            let (Ok(b_over_a), Ok(a_over_b)) = (b.rebase(a), a.rebase(b)) else {
                continue;
            };

            let mut left = TextDocument::from(BASE);
            a.apply(&mut left).unwrap();
            b_over_a.apply(&mut left).unwrap();

            let mut right = TextDocument::from(BASE);
            b.apply(&mut right).unwrap();
            a_over_b.apply(&mut right).unwrap();

            assert_eq!(left, right, "diverged for {:?} / {:?}", a, b);
            checked += 1;
        }
    }

    assert!(checked > 100);
}

#[test]
fn test_conflicts_are_symmetric() {
    let edits = all_single_edits();
    for a in &edits {
        for b in &edits {
            assert_eq!(
                b.rebase(a).is_err(),
                a.rebase(b).is_err(),
                "asymmetric conflict for {:?} / {:?}",
                a,
                b
            );
        }
    }
}

#[test]
fn test_sequences_converge() {
    let a = vec![
        TextStep::insert(5, "fg"),
        TextStep::delete(0, "a"),
        TextStep::insert(0, "A"),
    ];
    let b = vec![TextStep::delete(2, "cd"), TextStep::insert(2, "CD")];

    let mut left = TextDocument::from(BASE);
    apply_all(&mut left, &a).unwrap();
    apply_all(&mut left, &rebase_steps(&b, &a).unwrap()).unwrap();

    let mut right = TextDocument::from(BASE);
    apply_all(&mut right, &b).unwrap();
    apply_all(&mut right, &rebase_steps(&a, &b).unwrap()).unwrap();

    assert_eq!(left, right);
    assert_eq!(left.as_str(), "AbCDefg");
}
