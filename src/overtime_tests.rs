// src/overtime_tests.rs

#[cfg(test)]
mod tests {
    use crate::interval::{format_minutes, IntervalValue};
    use crate::overtime::*;
    use crate::rowstore::OvertimeEventRow;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    // Helper to build a raw overtime row with the six interval columns.
    #[allow(clippy::too_many_arguments)]
    fn overtime_row(
        id: Option<&str>,
        registration: &str,
        date: &str,
        hrs303: Option<&str>,
        hrs304: Option<&str>,
        hrs505: Option<&str>,
        hrs506: Option<&str>,
        hrs511: Option<&str>,
        hrs512: Option<&str>,
    ) -> OvertimeEventRow {
        let cell = |s: Option<&str>| s.map(|v| IntervalValue::Text(v.to_string()));
        OvertimeEventRow {
            id: id.map(str::to_string),
            registration: registration.to_string(),
            date: date.to_string(),
            hrs303: cell(hrs303),
            hrs304: cell(hrs304),
            hrs505: cell(hrs505),
            hrs506: cell(hrs506),
            hrs511: cell(hrs511),
            hrs512: cell(hrs512),
            name: None,
            sector: None,
            salary: None,
        }
    }

    fn no_directory() -> HashMap<String, EmployeeContext> {
        HashMap::new()
    }

    fn directory_with(registration: &str, name: &str, salary: Decimal) -> HashMap<String, EmployeeContext> {
        let mut directory = HashMap::new();
        directory.insert(
            registration.to_string(),
            EmployeeContext {
                name: Some(name.to_string()),
                sector: Some("Deboning".to_string()),
                company: Some("Plant 1".to_string()),
                salary,
            },
        );
        directory
    }

    fn bucket(row: &OvertimeEventRow) -> BucketedRecord {
        BucketedRecord::from_row(row, &no_directory()).expect("row should bucket")
    }

    // --- Bucketing ---

    #[test]
    fn buckets_the_six_interval_columns() {
        let row = overtime_row(
            Some("1"),
            "100",
            "2024-03-05",
            None,
            None,
            Some("02:30"),
            Some("00:00"),
            Some("00:45"),
            None,
        );
        let record = bucket(&row);
        assert_eq!(record.plus60_minutes, 150);
        assert_eq!(record.minus60_minutes, 45);
        assert_eq!(record.hours60_minutes, 105);
        assert_eq!(record.hours100_minutes, 0);
        assert_eq!(
            format_minutes(record.hours60_minutes),
            "01:45",
            "net 60% minutes should render as a clock string"
        );
    }

    #[test]
    fn buckets_comma_decimal_cells() {
        let row = overtime_row(
            Some("2"),
            "100",
            "2024-03-05",
            Some("1,5"),
            None,
            None,
            None,
            None,
            None,
        );
        let record = bucket(&row);
        assert_eq!(record.plus100_minutes, 90);
        assert_eq!(record.hours100_minutes, 90);
    }

    #[test]
    fn preserves_negative_daily_net() {
        // A day holding only offsets stays negative at the daily level.
        let row = overtime_row(
            Some("3"),
            "100",
            "2024-03-06",
            None,
            None,
            None,
            None,
            Some("01:20"),
            None,
        );
        let record = bucket(&row);
        assert_eq!(record.hours60_minutes, -80);
    }

    #[test]
    fn skips_rows_with_unparseable_dates() {
        let row = overtime_row(
            Some("4"),
            "100",
            "not-a-date",
            None,
            None,
            Some("01:00"),
            None,
            None,
            None,
        );
        assert!(
            BucketedRecord::from_row(&row, &no_directory()).is_none(),
            "a row whose date cannot be parsed cannot join date-keyed grouping"
        );
    }

    #[test]
    fn joins_identity_from_the_directory() {
        let row = overtime_row(Some("5"), "100", "2024-03-05", None, None, None, None, None, None);
        let directory = directory_with("100", "Maria", dec!(2200));
        let record = BucketedRecord::from_row(&row, &directory).unwrap();
        assert_eq!(record.name.as_deref(), Some("Maria"));
        assert_eq!(record.sector.as_deref(), Some("Deboning"));
        assert_eq!(record.company.as_deref(), Some("Plant 1"));
        assert_eq!(record.salary, dec!(2200));
    }

    #[test]
    fn denormalized_row_fields_win_over_the_directory() {
        let mut row = overtime_row(Some("6"), "100", "2024-03-05", None, None, None, None, None, None);
        row.name = Some("Maria Lucia".to_string());
        row.salary = Some(3000.0);
        let directory = directory_with("100", "Maria", dec!(2200));
        let record = BucketedRecord::from_row(&row, &directory).unwrap();
        assert_eq!(record.name.as_deref(), Some("Maria Lucia"));
        assert_eq!(record.salary, dec!(3000));
    }

    #[test]
    fn missing_directory_entry_defaults_to_zero_salary() {
        let row = overtime_row(Some("7"), "999", "2024-03-05", None, None, Some("01:00"), None, None, None);
        let record = bucket(&row);
        assert_eq!(record.salary, Decimal::ZERO);
        assert_eq!(record.sector, None);
    }

    // --- Deduplication ---

    #[test]
    fn dedupe_keeps_one_row_per_composite_key() {
        let rows = vec![
            overtime_row(Some("1"), "100", "2024-03-05", None, None, Some("01:00"), None, None, None),
            overtime_row(Some("1"), "100", "2024-03-05", None, None, Some("01:00"), None, None, None),
            overtime_row(Some("2"), "100", "2024-03-05", None, None, Some("02:00"), None, None, None),
        ];
        let deduped = dedupe_rows(rows);
        assert_eq!(
            deduped.len(),
            2,
            "rows repeated across fetch passes must be counted once"
        );
    }

    #[test]
    fn dedupe_is_idempotent() {
        let rows = vec![
            overtime_row(Some("1"), "100", "2024-03-05", None, None, None, None, None, None),
            overtime_row(Some("1"), "100", "2024-03-05", None, None, None, None, None, None),
            overtime_row(None, "101", "2024-03-05", None, None, None, None, None, None),
        ];
        let once = dedupe_rows(rows);
        let twice = dedupe_rows(once.clone());
        assert_eq!(once.len(), twice.len());
    }

    #[test]
    fn idless_rows_collapse_on_date_and_registration() {
        // Known undercount: without an id the remaining two key fields can
        // alias distinct rows.
        let rows = vec![
            overtime_row(None, "100", "2024-03-05", None, None, Some("01:00"), None, None, None),
            overtime_row(None, "100", "2024-03-05", None, None, Some("02:00"), None, None, None),
            overtime_row(None, "100", "2024-03-06", None, None, Some("03:00"), None, None, None),
        ];
        let deduped = dedupe_rows(rows);
        assert_eq!(deduped.len(), 2);
    }

    // --- Period grouping ---

    #[test]
    fn period_sums_components_then_nets_once() {
        let records: Vec<BucketedRecord> = vec![
            bucket(&overtime_row(Some("1"), "100", "2024-03-04", None, None, Some("02:00"), None, None, None)),
            bucket(&overtime_row(Some("2"), "100", "2024-03-05", None, None, None, None, Some("00:30"), None)),
            bucket(&overtime_row(Some("3"), "100", "2024-03-06", None, None, Some("01:00"), None, Some("00:15"), None)),
        ];
        let aggregates = group_by_period(&records);
        assert_eq!(aggregates.len(), 1);
        let aggregate = &aggregates[0];
        assert_eq!(aggregate.plus60_minutes, 180);
        assert_eq!(aggregate.minus60_minutes, 45);
        assert_eq!(aggregate.hours60_minutes, 135);
    }

    #[test]
    fn period_hours100_is_the_sum_of_daily_plus100() {
        // One day carries a negative 100% adjustment; the period figure must
        // come from the summed components, not from re-netting.
        let records: Vec<BucketedRecord> = vec![
            bucket(&overtime_row(Some("1"), "100", "2024-03-04", Some("01:00"), None, None, None, None, None)),
            bucket(&overtime_row(Some("2"), "100", "2024-03-05", Some("-0:20"), None, None, None, None, None)),
        ];
        let aggregates = group_by_period(&records);
        assert_eq!(aggregates[0].plus100_minutes, 40);
        assert_eq!(aggregates[0].hours100_minutes, 40);
    }

    #[test]
    fn period_additivity_over_disjoint_day_sets() {
        let set_a: Vec<BucketedRecord> = vec![
            bucket(&overtime_row(Some("1"), "100", "2024-03-04", Some("01:00"), None, None, None, None, None)),
            bucket(&overtime_row(Some("2"), "100", "2024-03-05", Some("00:30"), None, None, None, None, None)),
        ];
        let set_b: Vec<BucketedRecord> = vec![
            bucket(&overtime_row(Some("3"), "100", "2024-03-11", Some("02:00"), None, None, None, None, None)),
        ];
        let mut combined = set_a.clone();
        combined.extend(set_b.clone());

        let hours = |records: &[BucketedRecord]| group_by_period(records)[0].hours100_minutes;
        assert_eq!(
            hours(&combined),
            hours(&set_a) + hours(&set_b),
            "period hours must be additive over disjoint daily sets"
        );
    }

    #[test]
    fn period_output_is_order_independent() {
        let mut records: Vec<BucketedRecord> = vec![
            bucket(&overtime_row(Some("1"), "100", "2024-03-04", None, None, Some("01:00"), None, None, None)),
            bucket(&overtime_row(Some("2"), "200", "2024-03-05", None, None, Some("02:00"), None, None, None)),
            bucket(&overtime_row(Some("3"), "100", "2024-03-06", None, None, None, None, Some("00:30"), None)),
        ];
        let forward = group_by_period(&records);
        records.reverse();
        let reversed = group_by_period(&records);
        assert_eq!(forward, reversed);
    }

    #[test]
    fn period_tracks_min_and_max_dates() {
        let records: Vec<BucketedRecord> = vec![
            bucket(&overtime_row(Some("1"), "100", "2024-03-15", None, None, Some("01:00"), None, None, None)),
            bucket(&overtime_row(Some("2"), "100", "2024-03-01", None, None, Some("01:00"), None, None, None)),
        ];
        let aggregate = &group_by_period(&records)[0];
        assert_eq!(aggregate.min_date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(aggregate.max_date, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert_eq!(aggregate.range_label(), "01-15/03");
    }

    #[test]
    fn range_label_spanning_months_and_single_day() {
        let cross: Vec<BucketedRecord> = vec![
            bucket(&overtime_row(Some("1"), "100", "2024-02-15", None, None, Some("01:00"), None, None, None)),
            bucket(&overtime_row(Some("2"), "100", "2024-03-03", None, None, Some("01:00"), None, None, None)),
        ];
        assert_eq!(group_by_period(&cross)[0].range_label(), "15/02 - 03/03");

        let single: Vec<BucketedRecord> = vec![
            bucket(&overtime_row(Some("3"), "100", "2024-03-05", None, None, Some("01:00"), None, None, None)),
        ];
        assert_eq!(group_by_period(&single)[0].range_label(), "05/03");
    }

    #[test]
    fn identity_follows_record_dates_not_arrival_order() {
        let mut late = bucket(&overtime_row(Some("1"), "100", "2024-03-20", None, None, None, None, None, None));
        late.name = Some("Maria Lucia".to_string());
        late.salary = dec!(2400);
        let mut early = bucket(&overtime_row(Some("2"), "100", "2024-03-01", None, None, None, None, None, None));
        early.name = Some("Maria".to_string());
        early.salary = dec!(2200);
        let middle = bucket(&overtime_row(Some("3"), "100", "2024-03-10", None, None, None, None, None, None));
        // middle carries no identity at all

        // Arrival order puts the latest record first; the date must decide.
        let records = vec![late, early, middle];
        let aggregate = &group_by_period(&records)[0];
        assert_eq!(
            aggregate.name.as_deref(),
            Some("Maria Lucia"),
            "the most recent non-empty name by date must win"
        );
        assert_eq!(aggregate.salary, dec!(2400));
    }

    #[test]
    fn same_date_identity_resolves_independently_of_arrival_order() {
        // Two records on the same day with distinct ids both survive dedup;
        // the fold must pick the same identity whichever arrives first.
        let mut first = bucket(&overtime_row(Some("1"), "100", "2024-03-05", None, None, Some("01:00"), None, None, None));
        first.name = Some("Maria".to_string());
        first.salary = dec!(2200);
        let mut second = bucket(&overtime_row(Some("2"), "100", "2024-03-05", None, None, Some("02:00"), None, None, None));
        second.name = Some("Jose".to_string());
        second.salary = dec!(1980);

        let forward = group_by_period(&[first.clone(), second.clone()]);
        let reversed = group_by_period(&[second, first]);
        assert_eq!(
            forward, reversed,
            "grouping the same set must not depend on input ordering"
        );
        assert_eq!(forward[0].name.as_deref(), Some("Jose"));
        assert_eq!(forward[0].salary, dec!(1980));
    }

    #[test]
    fn aggregates_sort_numerically_when_registrations_are_digits() {
        let records: Vec<BucketedRecord> = vec![
            bucket(&overtime_row(Some("1"), "10", "2024-03-04", None, None, Some("01:00"), None, None, None)),
            bucket(&overtime_row(Some("2"), "9", "2024-03-04", None, None, Some("01:00"), None, None, None)),
        ];
        let aggregates = group_by_period(&records);
        assert_eq!(aggregates[0].registration, "9");
        assert_eq!(aggregates[1].registration, "10");
    }

    // --- Valuation ---

    #[test]
    fn valuates_at_the_configured_premiums() {
        let rates = ValuationRates::default();
        let valuation = valuate(120, 60, dec!(2200), false, &rates);
        // hourly rate 2200 / 220 = 10
        assert_eq!(valuation.value60, dec!(32.00));
        assert_eq!(valuation.value100, dec!(20.00));
    }

    #[test]
    fn negative_sixty_minutes_floor_at_zero_by_default() {
        let rates = ValuationRates::default();
        let valuation = valuate(-90, 0, dec!(2200), false, &rates);
        assert_eq!(valuation.value60, Decimal::ZERO);
    }

    #[test]
    fn allow_negative60_keeps_the_signed_value() {
        let rates = ValuationRates::default();
        let valuation = valuate(-60, 0, dec!(2200), true, &rates);
        assert_eq!(valuation.value60, dec!(-16.00));
    }

    #[test]
    fn zero_salary_values_everything_at_zero() {
        let rates = ValuationRates::default();
        let valuation = valuate(600, 600, Decimal::ZERO, false, &rates);
        assert_eq!(valuation.value60, Decimal::ZERO);
        assert_eq!(valuation.value100, Decimal::ZERO);
    }

    // --- Full view ---

    #[test]
    fn view_totals_come_from_the_daily_set_even_when_grouped() {
        let rows = vec![
            overtime_row(Some("1"), "100", "2024-03-04", Some("01:00"), None, Some("02:00"), None, None, None),
            overtime_row(Some("2"), "100", "2024-03-05", Some("00:30"), None, None, None, Some("00:45"), None),
            overtime_row(Some("3"), "200", "2024-03-04", Some("02:00"), None, None, None, None, None),
        ];
        let directory = directory_with("100", "Maria", dec!(2200));
        let options = ViewOptions {
            mode: ViewMode::Period,
            allow_negative60: false,
        };
        let view = compute_overtime_view(rows, &directory, &options, &ValuationRates::default());

        let daily_hours100: i64 = view.daily.iter().map(|r| r.hours100_minutes).sum();
        assert_eq!(view.totals.hours100_minutes, daily_hours100);
        assert_eq!(view.totals.hours100_minutes, 210);
        assert!(view.grouped.is_some(), "period mode must produce aggregates");
        assert_eq!(view.grouped.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn daily_mode_produces_no_aggregates() {
        let rows = vec![overtime_row(Some("1"), "100", "2024-03-04", None, None, Some("01:00"), None, None, None)];
        let options = ViewOptions {
            mode: ViewMode::Daily,
            allow_negative60: false,
        };
        let view = compute_overtime_view(rows, &no_directory(), &options, &ValuationRates::default());
        assert!(view.grouped.is_none());
        assert_eq!(view.daily.len(), 1);
    }

    #[test]
    fn view_counts_duplicate_rows_once() {
        let rows = vec![
            overtime_row(Some("1"), "100", "2024-03-04", None, None, Some("01:00"), None, None, None),
            overtime_row(Some("1"), "100", "2024-03-04", None, None, Some("01:00"), None, None, None),
        ];
        let options = ViewOptions {
            mode: ViewMode::Daily,
            allow_negative60: false,
        };
        let view = compute_overtime_view(rows, &no_directory(), &options, &ValuationRates::default());
        assert_eq!(view.daily.len(), 1);
        assert_eq!(view.totals.hours60_minutes, 60);
    }

    #[test]
    fn view_value60_stays_non_negative_by_default() {
        // The only recorded day is an offset, so the signed total is negative.
        let rows = vec![overtime_row(Some("1"), "100", "2024-03-04", None, None, None, None, Some("01:30"), None)];
        let directory = directory_with("100", "Maria", dec!(2200));
        let options = ViewOptions {
            mode: ViewMode::Period,
            allow_negative60: false,
        };
        let view = compute_overtime_view(rows, &directory, &options, &ValuationRates::default());
        assert_eq!(view.totals.hours60_minutes, -90);
        assert_eq!(
            view.totals.value60,
            Decimal::ZERO,
            "negative 60% minutes must not produce a negative value by default"
        );
    }

    #[test]
    fn view_allow_negative60_carries_the_sign_into_value() {
        let rows = vec![overtime_row(Some("1"), "100", "2024-03-04", None, None, None, None, Some("01:00"), None)];
        let directory = directory_with("100", "Maria", dec!(2200));
        let options = ViewOptions {
            mode: ViewMode::Period,
            allow_negative60: true,
        };
        let view = compute_overtime_view(rows, &directory, &options, &ValuationRates::default());
        assert_eq!(view.totals.value60, dec!(-16.00));
    }

    #[test]
    fn view_drops_rows_with_bad_dates_and_keeps_the_rest() {
        let rows = vec![
            overtime_row(Some("1"), "100", "2024-03-04", None, None, Some("01:00"), None, None, None),
            overtime_row(Some("2"), "100", "garbage", None, None, Some("05:00"), None, None, None),
        ];
        let options = ViewOptions {
            mode: ViewMode::Daily,
            allow_negative60: false,
        };
        let view = compute_overtime_view(rows, &no_directory(), &options, &ValuationRates::default());
        assert_eq!(view.daily.len(), 1);
        assert_eq!(view.totals.hours60_minutes, 60);
    }

    #[test]
    fn view_daily_rows_sort_by_date_then_registration() {
        let rows = vec![
            overtime_row(Some("1"), "10", "2024-03-05", None, None, Some("01:00"), None, None, None),
            overtime_row(Some("2"), "9", "2024-03-05", None, None, Some("01:00"), None, None, None),
            overtime_row(Some("3"), "100", "2024-03-04", None, None, Some("01:00"), None, None, None),
        ];
        let options = ViewOptions {
            mode: ViewMode::Daily,
            allow_negative60: false,
        };
        let view = compute_overtime_view(rows, &no_directory(), &options, &ValuationRates::default());
        let order: Vec<&str> = view.daily.iter().map(|r| r.registration.as_str()).collect();
        assert_eq!(order, vec!["100", "9", "10"]);
    }
}
