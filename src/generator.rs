//! Construction generators, one per family.
//!
//! A generator never derives labels: the caller decides how the two features
//! correlate with the observable label, and the generator only picks literals
//! that realise the requested feature values.

use crate::construction::{ConstructionType, FeatureTask, FormatType};
use crate::draws::{pick, DrawSource};
use crate::example::Example;
use crate::lexicon::{CategoryId, Lexicon};

/// Generates examples for one construction family in one format.
#[derive(Debug, Clone, Copy)]
pub struct ExampleGenerator<'a> {
    construction_type: ConstructionType,
    format_type: FormatType,
    lexicon: &'a Lexicon,
}

impl ExampleGenerator<'static> {
    /// Generator over the built-in lexicon.
    pub fn new(construction_type: ConstructionType, format_type: FormatType) -> Self {
        Self::with_lexicon(construction_type, format_type, Lexicon::builtin())
    }
}

impl<'a> ExampleGenerator<'a> {
    pub fn with_lexicon(
        construction_type: ConstructionType,
        format_type: FormatType,
        lexicon: &'a Lexicon,
    ) -> Self {
        Self {
            construction_type,
            format_type,
            lexicon,
        }
    }

    pub fn construction_type(&self) -> ConstructionType {
        self.construction_type
    }

    pub fn format_type(&self) -> FormatType {
        self.format_type
    }

    /// Build one example whose labels are exactly the inputs.
    ///
    /// Draw order: the task-A literal, then the task-B literal, then (for the
    /// religious-pronoun and propn-negation families) the filler location.
    pub fn generate_example<D: DrawSource + ?Sized>(
        &self,
        draws: &mut D,
        task_a_label: bool,
        task_b_label: bool,
        active_task_label: bool,
        salient_task: Option<FeatureTask>,
    ) -> Example {
        let construction = match self.construction_type {
            ConstructionType::SubjectLocation => {
                let subject = self.choose(
                    draws,
                    task_a_label,
                    CategoryId::HumanSubject,
                    CategoryId::AnimalSubject,
                );
                let location = self.choose(
                    draws,
                    task_b_label,
                    CategoryId::UrbanLocation,
                    CategoryId::NaturalLocation,
                );
                format!("The {subject} is in the {location}.")
            }
            ConstructionType::ReligiousPronoun => {
                let leader = self.choose(
                    draws,
                    task_a_label,
                    CategoryId::ReligiousLeader,
                    CategoryId::SecularLeader,
                );
                let pronoun = self.choose(
                    draws,
                    task_b_label,
                    CategoryId::MalePronoun,
                    CategoryId::FemalePronoun,
                );
                let location = pick(draws, self.lexicon.values(CategoryId::UrbanLocation));
                format!("{pronoun} is in the {location} with the {leader}.")
            }
            ConstructionType::PropnNegation => {
                let noun = if task_a_label {
                    pick(draws, self.lexicon.values(CategoryId::ProperNoun)).clone()
                } else {
                    format!(
                        "The {}",
                        pick(draws, self.lexicon.values(CategoryId::HumanSubject))
                    )
                };
                let copula = self.choose(
                    draws,
                    task_b_label,
                    CategoryId::PositiveCopula,
                    CategoryId::NegatedCopula,
                );
                let location = pick(draws, self.lexicon.values(CategoryId::UrbanLocation));
                format!("{noun} {copula} in the {location}.")
            }
        };

        Example {
            construction_type: self.construction_type,
            salient_task,
            format_type: self.format_type,
            construction,
            task_a_label,
            task_b_label,
            active_task_label,
        }
    }

    /// Mirror the reference's label triple, or flip all of it, with equal odds.
    pub fn generate_example_given_salient<D: DrawSource + ?Sized>(
        &self,
        draws: &mut D,
        reference: &Example,
    ) -> Example {
        let mirror = draws.coin();
        let (a, b, active) = reference.labels();
        if mirror {
            self.generate_example(draws, a, b, active, reference.salient_task)
        } else {
            self.generate_example(draws, !a, !b, !active, reference.salient_task)
        }
    }

    fn choose<D: DrawSource + ?Sized>(
        &self,
        draws: &mut D,
        label: bool,
        when_true: CategoryId,
        when_false: CategoryId,
    ) -> &'a str {
        let id = if label { when_true } else { when_false };
        pick(draws, self.lexicon.values(id)).as_str()
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::draws::scripted::ScriptedDraws;

    const TRIPLES: [(bool, bool, bool); 8] = [
        (false, false, false),
        (false, false, true),
        (false, true, false),
        (false, true, true),
        (true, false, false),
        (true, false, true),
        (true, true, false),
        (true, true, true),
    ];

    #[test]
    fn labels_are_copied_verbatim_for_every_family() {
        let mut rng = StdRng::seed_from_u64(11);
        for ct in ConstructionType::ALL {
            let generator = ExampleGenerator::new(ct, FormatType::Arrow);
            for (a, b, y) in TRIPLES {
                let ex = generator.generate_example(&mut rng, a, b, y, None);
                assert_eq!(ex.labels(), (a, b, y), "{ct}");
                assert_eq!(ex.construction_type, ct);
                assert_eq!(ex.format_type, FormatType::Arrow);
                assert!(ex.salient_task.is_none());
            }
        }
    }

    #[test]
    fn subject_location_literals_follow_labels() {
        let lex = Lexicon::builtin();
        let generator = ExampleGenerator::new(ConstructionType::SubjectLocation, FormatType::Qa);
        let mut draws = ScriptedDraws::default().with_indices(&[6, 1]);
        let ex = generator.generate_example(&mut draws, true, false, true, None);
        assert_eq!(ex.construction, "The critic is in the pond.");
        assert!(lex
            .values(CategoryId::HumanSubject)
            .iter()
            .any(|s| ex.construction.contains(s.as_str())));
    }

    #[test]
    fn religious_pronoun_template() {
        let generator =
            ExampleGenerator::new(ConstructionType::ReligiousPronoun, FormatType::Arrow);
        let mut draws = ScriptedDraws::default().with_indices(&[4, 0, 0]);
        let ex = generator.generate_example(&mut draws, true, false, false, None);
        assert_eq!(ex.construction, "She is in the laboratory with the rabbi.");

        let ex = generator.generate_example(&mut draws, false, true, false, None);
        assert_eq!(ex.construction, "He is in the laboratory with the president.");
    }

    #[test]
    fn propn_negation_template() {
        let generator = ExampleGenerator::new(ConstructionType::PropnNegation, FormatType::Arrow);
        let mut draws = ScriptedDraws::default().with_indices(&[4, 1, 1]);
        let ex = generator.generate_example(&mut draws, true, false, true, None);
        assert_eq!(ex.construction, "Noam Chomsky was not in the theatre.");

        let ex = generator.generate_example(&mut draws, false, true, true, None);
        assert_eq!(ex.construction, "The student is in the laboratory.");
    }

    #[test]
    fn given_salient_is_full_mirror_or_full_flip() {
        let mut rng = StdRng::seed_from_u64(3);
        for ct in ConstructionType::ALL {
            let generator = ExampleGenerator::new(ct, FormatType::Qa);
            for (a, b, y) in TRIPLES {
                let reference = Example {
                    salient_task: Some(ct.task(crate::construction::Axis::TaskA)),
                    ..generator.generate_example(&mut rng, a, b, y, None)
                };
                for _ in 0..8 {
                    let next = generator.generate_example_given_salient(&mut rng, &reference);
                    let same = next.labels() == (a, b, y);
                    let flipped = next.labels() == (!a, !b, !y);
                    assert!(same || flipped, "partial flip: {:?}", next.labels());
                    assert_eq!(next.salient_task, reference.salient_task);
                }
            }
        }
    }

    #[test]
    fn given_salient_follows_the_coin() {
        let generator = ExampleGenerator::new(ConstructionType::SubjectLocation, FormatType::Arrow);
        let mut rng = StdRng::seed_from_u64(5);
        let reference = generator.generate_example(&mut rng, true, false, true, None);

        let mirrored =
            generator.generate_example_given_salient(&mut ScriptedDraws::coins(&[true]), &reference);
        assert_eq!(mirrored.labels(), (true, false, true));

        let flipped =
            generator.generate_example_given_salient(&mut ScriptedDraws::coins(&[false]), &reference);
        assert_eq!(flipped.labels(), (false, true, false));
    }
}
