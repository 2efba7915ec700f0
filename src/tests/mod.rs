mod alert_scenarios;
