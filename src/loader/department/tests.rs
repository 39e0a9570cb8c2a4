use super::*;

#[test]
fn tags_folder_after_data_segment() {
    assert_eq!(department_from_path("data/hr/hr_data.csv"), "Hr");
    assert_eq!(
        department_from_path("data/finance/quarterly_financial_report.md"),
        "Finance"
    );
    assert_eq!(
        department_from_path("/srv/app/data/MARKETING/q4/report.md"),
        "Marketing"
    );
}

#[test]
fn unknown_without_data_segment() {
    assert_eq!(department_from_path("docs/hr/hr_data.csv"), UNKNOWN_DEPARTMENT);
    assert_eq!(department_from_path("data"), UNKNOWN_DEPARTMENT);
    assert_eq!(department_from_path(""), UNKNOWN_DEPARTMENT);
}

#[test]
fn data_segment_must_match_exactly() {
    assert_eq!(
        department_from_path("Data/hr/hr_data.csv"),
        UNKNOWN_DEPARTMENT
    );
    assert_eq!(
        department_from_path("metadata/hr/hr_data.csv"),
        UNKNOWN_DEPARTMENT
    );
}

#[test]
fn first_data_segment_wins() {
    assert_eq!(department_from_path("data/general/data/hr/x.md"), "General");
}

#[test]
fn root_tagger_uses_folder_under_root() {
    let tagger = DepartmentTagger::for_root("/corpus/docs");
    assert_eq!(tagger.tag("/corpus/docs/engineering/guide.md"), "Engineering");
    assert_eq!(tagger.tag("/corpus/docs/hr/nested/deep/file.txt"), "Hr");
    assert_eq!(tagger.tag("/elsewhere/hr/file.txt"), UNKNOWN_DEPARTMENT);
}

#[test]
fn capitalize_matches_title_rule() {
    assert_eq!(capitalize("hr"), "Hr");
    assert_eq!(capitalize("HR"), "Hr");
    assert_eq!(capitalize("fINANCE"), "Finance");
    assert_eq!(capitalize(""), "");
    assert_eq!(capitalize("équipe"), "Équipe");
}
