use std::collections::HashSet;
use std::sync::Mutex;

use serde_json::{Value, json};

use kira_taxa_catalog::batch::BatchPolicy;
use kira_taxa_catalog::domain::{Rank, TaxonomyId};
use kira_taxa_catalog::error::CatalogError;
use kira_taxa_catalog::groups::{GroupSet, GroupSets, TaxonomicGroupRule};
use kira_taxa_catalog::ncbi::{ApiResponse, NcbiClient, TAXONOMY_DATASET_REPORT};
use kira_taxa_catalog::taxonomy::{
    TaxonCache, TaxonReport, ancestor_ids_for_lookup, derive_taxon_record, fetch_taxonomy,
    other_taxa,
};

/// Echoes one minimal taxon per requested id and records each id list.
#[derive(Default)]
struct EchoTaxa {
    requested: Mutex<Vec<Vec<String>>>,
}

impl NcbiClient for EchoTaxa {
    fn post_json(&self, path: &str, body: &Value) -> Result<ApiResponse, CatalogError> {
        assert_eq!(path, TAXONOMY_DATASET_REPORT);
        let ids = body["taxons"]
            .as_array()
            .unwrap()
            .iter()
            .map(|id| id.as_str().unwrap().to_string())
            .collect::<Vec<_>>();
        let reports = ids
            .iter()
            .map(|id| {
                json!({
                    "taxonomy": {
                        "tax_id": id,
                        "rank": "SEROTYPE",
                        "current_scientific_name": {"name": format!("taxon {id}")}
                    }
                })
            })
            .collect::<Vec<_>>();
        self.requested.lock().unwrap().push(ids);
        Ok(ApiResponse::ok(json!({"reports": reports}).to_string()))
    }
}

fn ids(values: &[u64]) -> Vec<TaxonomyId> {
    values.iter().copied().map(TaxonomyId::new).collect()
}

fn levels(names: &[&str]) -> Vec<Rank> {
    names.iter().map(|name| name.parse().unwrap()).collect()
}

fn report(value: Value) -> TaxonReport {
    serde_json::from_value(value).unwrap()
}

fn human() -> TaxonReport {
    report(json!({
        "taxonomy": {
            "tax_id": 9606,
            "rank": "SPECIES",
            "current_scientific_name": {"name": "Homo sapiens"},
            "parents": [1, 131567, 2759, 33208, 7711, 7742, 40674, 9443, 9604, 9605],
            "classification": {
                "domain": {"name": "Eukaryota", "id": 2759},
                "class": {"name": "Mammalia", "id": 40674},
                "genus": {"name": "Homo", "id": 9605}
            }
        }
    }))
}

fn zebrafish() -> TaxonReport {
    report(json!({
        "taxonomy": {
            "tax_id": 7955,
            "rank": "SPECIES",
            "current_scientific_name": {"name": "Danio rerio"},
            "parents": ["1", "131567", "2759", "33208", "7711", "7742", "7898", "7954"],
            "classification": {
                "domain": {"name": "Eukaryota", "id": "2759"},
                "genus": {"name": "Danio", "id": "7954"}
            }
        }
    }))
}

#[test]
fn lineage_runs_root_to_self() {
    let record = derive_taxon_record(
        &human(),
        None,
        &levels(&["genus", "species"]),
        &GroupSets::new(),
        &TaxonCache::new(),
    );

    assert_eq!(record.lineage.first(), Some(&TaxonomyId::ROOT));
    assert_eq!(record.lineage.last(), Some(&TaxonomyId::new(9606)));
    assert_eq!(record.lineage.len(), 11);
    assert_eq!(
        record.lineage_string(),
        "1,131567,2759,33208,7711,7742,40674,9443,9604,9605,9606"
    );
    let species = record.species.as_ref().unwrap();
    assert_eq!(species.name, "Homo sapiens");
    assert_eq!(species.id, TaxonomyId::new(9606));
    assert!(record.taxon_at(&"class".parse().unwrap()).is_none());
}

#[test]
fn exclusion_keeps_mammals_out_of_vertebrata() {
    let mut groups = GroupSets::new();
    groups.insert(
        "taxonomicGroup",
        GroupSet::new([
            TaxonomicGroupRule::new(TaxonomyId::new(2759), "Eukaryota"),
            TaxonomicGroupRule::new(TaxonomyId::new(7742), "Vertebrata")
                .excluding(ids(&[40674])),
        ]),
    );
    let ranks = levels(&["species"]);
    let cache = TaxonCache::new();

    let human = derive_taxon_record(&human(), None, &ranks, &groups, &cache);
    let fish = derive_taxon_record(&zebrafish(), None, &ranks, &groups, &cache);

    assert_eq!(human.groups["taxonomicGroup"], "Eukaryota");
    assert_eq!(fish.groups["taxonomicGroup"], "Eukaryota,Vertebrata");
}

#[test]
fn group_rule_keyed_on_the_taxon_itself_matches() {
    let set = GroupSet::new([TaxonomicGroupRule::new(TaxonomyId::new(9606), "Human")]);
    let record = derive_taxon_record(
        &human(),
        None,
        &levels(&["species"]),
        &GroupSets::new(),
        &TaxonCache::new(),
    );

    assert_eq!(set.classify(&record.lineage), vec!["Human"]);
}

#[test]
fn cache_fill_skips_root_cached_and_repeated_ids() {
    let client = EchoTaxa::default();
    let mut cache = TaxonCache::new();
    cache.record(&human());

    cache
        .fill(&client, ids(&[1, 9606, 7742, 40674, 7742]), BatchPolicy::default())
        .unwrap();

    let requested = client.requested.lock().unwrap().clone();
    assert_eq!(requested, vec![vec!["7742".to_string(), "40674".to_string()]]);
    assert_eq!(cache.len(), 3);
    assert_eq!(cache.name(TaxonomyId::new(40674)), Some("taxon 40674"));
    assert_eq!(
        cache.rank(TaxonomyId::new(9606)).map(Rank::as_str),
        Some("species")
    );

    cache.fill(&client, ids(&[7742]), BatchPolicy::default()).unwrap();
    assert_eq!(client.requested.lock().unwrap().len(), 1);
}

#[test]
fn fetch_sends_unique_sorted_ids() {
    let client = EchoTaxa::default();

    let reports = fetch_taxonomy(&client, &ids(&[562, 2, 562, 10]), BatchPolicy::default()).unwrap();

    assert_eq!(reports.len(), 3);
    let requested = client.requested.lock().unwrap().clone();
    assert_eq!(requested, vec![vec!["2", "10", "562"]]);
}

#[test]
fn serotype_levels_pull_ancestors_from_cache() {
    let strain = report(json!({
        "taxonomy": {
            "tax_id": 90371,
            "rank": "STRAIN",
            "current_scientific_name": {"name": "Salmonella enterica subsp. enterica serovar Typhimurium str. LT2"},
            "parents": [1, 2, 590, 28901, 59201, 90370],
            "classification": {
                "genus": {"name": "Salmonella", "id": 590},
                "species": {"name": "Salmonella enterica", "id": 28901}
            }
        }
    }));
    let ranks = levels(&["species", "serotype", "strain"]);

    let lookup = ancestor_ids_for_lookup(std::slice::from_ref(&strain), &ranks);
    assert_eq!(lookup, ids(&[1, 2, 590, 28901, 59201, 90370]));
    assert!(ancestor_ids_for_lookup(std::slice::from_ref(&strain), &levels(&["species"])).is_empty());

    let client = EchoTaxa::default();
    let mut cache = TaxonCache::new();
    cache.fill(&client, ids(&[90370]), BatchPolicy::default()).unwrap();
    let record = derive_taxon_record(&strain, None, &ranks, &GroupSets::new(), &cache);

    let serotype = record.taxon_at(&"serotype".parse().unwrap()).unwrap();
    assert_eq!(serotype.id, TaxonomyId::new(90370));
    assert_eq!(serotype.name, "taxon 90370");
    assert_eq!(
        record.taxon_at(&"strain".parse().unwrap()).unwrap().id,
        TaxonomyId::new(90371)
    );
    assert!(record.taxon_at(&"genus".parse().unwrap()).is_none());
}

#[test]
fn other_taxa_lists_highlighted_ancestors_outside_tree_ranks() {
    let client = EchoTaxa::default();
    let mut cache = TaxonCache::new();
    cache.fill(&client, ids(&[7742]), BatchPolicy::default()).unwrap();
    let record = derive_taxon_record(
        &human(),
        None,
        &levels(&["species"]),
        &GroupSets::new(),
        &cache,
    );
    let highlighted = ids(&[7742, 10090]).into_iter().collect::<HashSet<_>>();

    let names = other_taxa(&record.lineage, &highlighted, &levels(&["species"]), &cache);
    assert_eq!(names, Some(vec!["taxon 7742".to_string()]));

    let names = other_taxa(
        &record.lineage,
        &highlighted,
        &levels(&["serotype", "species"]),
        &cache,
    );
    assert_eq!(names, None);
}

#[test]
fn cached_ancestors_only_fill_ranks_when_lookup_ranks_requested() {
    let child = report(json!({
        "taxonomy": {
            "tax_id": 101,
            "rank": "NO_RANK",
            "current_scientific_name": {"name": "Examplea testis str. A variant"},
            "parents": [1, 2, 50, 60, 100],
            "classification": {
                "species": {"name": "Examplea testis", "id": 60}
            }
        }
    }));
    let strain = report(json!({
        "taxonomy": {
            "tax_id": 100,
            "rank": "STRAIN",
            "current_scientific_name": {"name": "Examplea testis str. A"}
        }
    }));
    let strain_rank: Rank = "strain".parse().unwrap();
    let mut cache = TaxonCache::new();

    let before = derive_taxon_record(
        &child,
        None,
        &levels(&["species", "strain"]),
        &GroupSets::new(),
        &cache,
    );
    cache.record(&strain);
    let after = derive_taxon_record(
        &child,
        None,
        &levels(&["species", "strain"]),
        &GroupSets::new(),
        &cache,
    );

    assert!(before.taxon_at(&strain_rank).is_none());
    assert_eq!(before, after);

    let with_lookup = derive_taxon_record(
        &child,
        None,
        &levels(&["species", "serotype", "strain"]),
        &GroupSets::new(),
        &cache,
    );
    assert_eq!(
        with_lookup.taxon_at(&strain_rank).unwrap().id,
        TaxonomyId::new(100)
    );
}
